use crate::downloader::{ArtworkSource, FinishedAsset};
use crate::errors::{Result, SpotifyToMp3Error};
use crate::utils::fs::ScopedPath;
use crate::utils::net::NetworkUtils;
use async_trait::async_trait;
use id3::{frame::Picture as Id3Picture, frame::PictureType as Id3PictureType, Tag, TagLike, Version};
use image::ImageFormat;
use lofty::{
    config::WriteOptions,
    file::{AudioFile, TaggedFileExt},
    picture::{MimeType, Picture as LoftyPicture, PictureType as LoftyPictureType},
    tag::Tag as LoftyTag,
};
use reqwest::Client;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const COVER_MIME: &str = "image/jpeg";
const COVER_DESCRIPTION: &str = "Cover";

/// Artwork fetched over HTTP
pub struct HttpArtworkSource {
    client: Client,
}

impl HttpArtworkSource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtworkSource for HttpArtworkSource {
    async fn fetch_artwork(&self, url: &str) -> Result<Vec<u8>> {
        NetworkUtils::download_bytes(&self.client, url).await
    }
}

/// Embeds a single front-cover image into finished audio files
pub struct Tagger {
    source: Arc<dyn ArtworkSource>,
    work_dir: PathBuf,
}

impl Tagger {
    /// Temporary artwork files are written into `work_dir`
    pub fn new(source: Arc<dyn ArtworkSource>, work_dir: PathBuf) -> Self {
        Self { source, work_dir }
    }

    /// Download the artwork to `<work_dir>/<temp_name>.jpg`, embed it as the
    /// only front cover of `media_path`, and delete the temporary image on
    /// every return path.
    pub async fn tag_with_artwork(
        &self,
        media_path: &Path,
        artwork_url: &str,
        temp_name: &str,
        cancel: &CancellationToken,
    ) -> Result<FinishedAsset> {
        let artwork = ScopedPath::new(self.work_dir.join(format!("{}.jpg", temp_name)));

        info!("Initiating download for Image {}.", artwork_url);
        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(SpotifyToMp3Error::Cancelled),
            bytes = self.source.fetch_artwork(artwork_url) => bytes?,
        };
        tokio::fs::write(artwork.path(), ensure_jpeg(bytes)?).await?;

        if !media_path.is_file() {
            return Err(SpotifyToMp3Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", media_path.display()),
            )));
        }

        info!("Adding cover image to {}", media_path.display());
        let data = tokio::fs::read(artwork.path()).await?;
        let target = media_path.to_path_buf();
        let embedded = tokio::task::spawn_blocking(move || embed_cover(&target, data))
            .await
            .map_err(|e| SpotifyToMp3Error::Join(e.to_string()))?;

        // A container that cannot take a tag counts as already tagged
        match embedded {
            Ok(()) => {}
            Err(SpotifyToMp3Error::TagWrite(reason)) => {
                warn!("Leaving {} untagged: {}", media_path.display(), reason);
            }
            Err(e) => return Err(e),
        }

        Ok(FinishedAsset {
            path: media_path.to_path_buf(),
        })
    }
}

/// Re-encode non-JPEG artwork so the declared MIME type holds
fn ensure_jpeg(bytes: Vec<u8>) -> Result<Vec<u8>> {
    match image::guess_format(&bytes) {
        Ok(ImageFormat::Jpeg) => Ok(bytes),
        Ok(format) => {
            debug!("Converting {:?} artwork to JPEG", format);
            let decoded = image::load_from_memory_with_format(&bytes, format)?;
            let rgb = image::DynamicImage::ImageRgb8(decoded.to_rgb8());
            let mut buffer = Cursor::new(Vec::new());
            rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
            Ok(buffer.into_inner())
        }
        Err(_) => Err(SpotifyToMp3Error::Transfer(
            "Artwork response is not a recognised image".to_string(),
        )),
    }
}

fn embed_cover(path: &Path, data: Vec<u8>) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "mp3" => embed_id3_cover(path, data),
        _ => embed_lofty_cover(path, data),
    }
}

fn embed_id3_cover(path: &Path, data: Vec<u8>) -> Result<()> {
    // A missing or damaged tag is replaced, never an error
    let mut tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(e) => {
            if !matches!(e.kind, id3::ErrorKind::NoTag) {
                warn!("Unreadable ID3 tag on {}: {}", path.display(), e);
            }
            e.partial_tag.unwrap_or_else(Tag::new)
        }
    };

    tag.remove_picture_by_type(Id3PictureType::CoverFront);
    tag.add_frame(Id3Picture {
        mime_type: COVER_MIME.to_string(),
        picture_type: Id3PictureType::CoverFront,
        description: COVER_DESCRIPTION.to_string(),
        data,
    });

    tag.write_to_path(path, Version::Id3v24)
        .map_err(|e| SpotifyToMp3Error::TagWrite(format!("{}: {}", path.display(), e)))
}

fn embed_lofty_cover(path: &Path, data: Vec<u8>) -> Result<()> {
    let mut tagged_file = lofty::read_from_path(path)
        .map_err(|e| SpotifyToMp3Error::TagWrite(format!("{}: {}", path.display(), e)))?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(LoftyTag::new(tag_type));
    }

    let tag = tagged_file.primary_tag_mut().ok_or_else(|| {
        SpotifyToMp3Error::TagWrite(format!("{} has no writable tag", path.display()))
    })?;
    tag.remove_picture_type(LoftyPictureType::CoverFront);
    tag.push_picture(LoftyPicture::new_unchecked(
        LoftyPictureType::CoverFront,
        Some(MimeType::Jpeg),
        Some(COVER_DESCRIPTION.to_string()),
        data,
    ));

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(|e| SpotifyToMp3Error::TagWrite(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FAKE_JPEG: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F', 0x00];

    struct FakeArtwork {
        bytes: Option<Vec<u8>>,
        calls: AtomicUsize,
    }

    impl FakeArtwork {
        fn serving(bytes: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                bytes: Some(bytes.to_vec()),
                calls: AtomicUsize::new(0),
            })
        }

        fn broken() -> Arc<Self> {
            Arc::new(Self {
                bytes: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ArtworkSource for FakeArtwork {
        async fn fetch_artwork(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bytes
                .clone()
                .ok_or_else(|| SpotifyToMp3Error::Transfer(format!("GET {} returned 404", url)))
        }
    }

    /// Frame-sync header followed by silence; enough for ID3 to attach to
    fn fake_mp3(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut bytes = vec![0xFF, 0xFB, 0x90, 0x64];
        bytes.resize(2048, 0);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn cover_count(path: &Path) -> usize {
        Tag::read_from_path(path)
            .unwrap()
            .pictures()
            .filter(|p| p.picture_type == Id3PictureType::CoverFront)
            .count()
    }

    #[tokio::test]
    async fn embeds_one_front_cover_and_removes_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let media = fake_mp3(dir.path(), "Song.mp3");
        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());

        let asset = tagger
            .tag_with_artwork(&media, "https://i.scdn.co/image/a", "cover-1", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(asset.path, media);
        assert!(!dir.path().join("cover-1.jpg").exists());

        let tag = Tag::read_from_path(&media).unwrap();
        let pictures: Vec<_> = tag.pictures().collect();
        assert_eq!(pictures.len(), 1);
        assert_eq!(pictures[0].mime_type, "image/jpeg");
        assert_eq!(pictures[0].picture_type, Id3PictureType::CoverFront);
        assert_eq!(pictures[0].data, FAKE_JPEG);
    }

    #[tokio::test]
    async fn tagging_twice_keeps_a_single_cover() {
        let dir = tempfile::tempdir().unwrap();
        let media = fake_mp3(dir.path(), "Twice.mp3");
        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());
        let cancel = CancellationToken::new();

        tagger
            .tag_with_artwork(&media, "https://i.scdn.co/image/a", "cover-a", &cancel)
            .await
            .unwrap();
        tagger
            .tag_with_artwork(&media, "https://i.scdn.co/image/a", "cover-b", &cancel)
            .await
            .unwrap();

        assert_eq!(cover_count(&media), 1);
    }

    #[tokio::test]
    async fn keeps_existing_text_frames() {
        let dir = tempfile::tempdir().unwrap();
        let media = fake_mp3(dir.path(), "Titled.mp3");
        let mut tag = Tag::new();
        tag.set_title("Song 2");
        tag.write_to_path(&media, Version::Id3v24).unwrap();

        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());
        tagger
            .tag_with_artwork(&media, "u", "cover", &CancellationToken::new())
            .await
            .unwrap();

        let tag = Tag::read_from_path(&media).unwrap();
        assert_eq!(tag.title(), Some("Song 2"));
        assert_eq!(cover_count(&media), 1);
    }

    #[tokio::test]
    async fn temp_file_is_removed_when_tagging_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.mp3");
        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());

        let result = tagger
            .tag_with_artwork(&missing, "u", "cover-fail", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(SpotifyToMp3Error::Io(_))));
        assert!(!dir.path().join("cover-fail.jpg").exists());
    }

    #[tokio::test]
    async fn artwork_download_failure_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let media = fake_mp3(dir.path(), "NoArt.mp3");
        let source = FakeArtwork::broken();
        let tagger = Tagger::new(source.clone(), dir.path().to_path_buf());

        let result = tagger
            .tag_with_artwork(&media, "https://i.scdn.co/image/gone", "cover-x", &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(SpotifyToMp3Error::Transfer(_))));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("cover-x.jpg").exists());
        assert!(Tag::read_from_path(&media).is_err());
    }

    #[test]
    fn png_artwork_is_converted_to_jpeg() {
        let png = {
            let image = image::DynamicImage::ImageRgba8(image::RgbaImage::new(4, 4));
            let mut buffer = Cursor::new(Vec::new());
            image.write_to(&mut buffer, ImageFormat::Png).unwrap();
            buffer.into_inner()
        };

        let converted = ensure_jpeg(png).unwrap();
        assert_eq!(image::guess_format(&converted).unwrap(), ImageFormat::Jpeg);

        assert!(ensure_jpeg(b"<html>not found</html>".to_vec()).is_err());
    }

    /// `fLaC` marker and a lone STREAMINFO block: 44.1 kHz, 2 channels, 16 bit
    fn fake_flac(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        let mut bytes = b"fLaC".to_vec();
        bytes.extend_from_slice(&[0x80, 0x00, 0x00, 0x22]);
        bytes.extend_from_slice(&[0x10, 0x00, 0x10, 0x00]);
        bytes.extend_from_slice(&[0x00; 6]);
        bytes.extend_from_slice(&[0x0A, 0xC4, 0x42, 0xF0, 0x00, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(&[0x00; 16]);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn flac_gets_a_single_jpeg_cover() {
        let dir = tempfile::tempdir().unwrap();
        let media = fake_flac(dir.path(), "Track.flac");
        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());

        for _ in 0..2 {
            tagger
                .tag_with_artwork(&media, "u", "cover-flac", &CancellationToken::new())
                .await
                .unwrap();
        }

        let tagged = lofty::read_from_path(&media).unwrap();
        let covers: Vec<_> = tagged
            .primary_tag()
            .unwrap()
            .pictures()
            .iter()
            .filter(|p| p.pic_type() == LoftyPictureType::CoverFront)
            .collect();
        assert_eq!(covers.len(), 1);
        assert_eq!(covers[0].mime_type(), Some(&MimeType::Jpeg));
        assert_eq!(covers[0].data(), FAKE_JPEG);
        assert!(!dir.path().join("cover-flac.jpg").exists());
    }

    #[tokio::test]
    async fn malformed_container_is_left_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("Track.m4a");
        let garbage = vec![0x42; 512];
        std::fs::write(&media, &garbage).unwrap();
        let tagger = Tagger::new(FakeArtwork::serving(FAKE_JPEG), dir.path().to_path_buf());

        let asset = tagger
            .tag_with_artwork(&media, "u", "cover-bad", &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(asset.path, media);
        assert_eq!(std::fs::read(&media).unwrap(), garbage);
        assert!(!dir.path().join("cover-bad.jpg").exists());
    }
}
