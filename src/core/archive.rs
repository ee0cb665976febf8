//! CBZ chapter archives
//!
//! A CBZ is a plain ZIP container whose image entries are the pages of a
//! chapter. Pages are ordered by natural comparison of their basenames, so
//! `p2.jpg` comes before `p10.jpg` even without zero padding.

use crate::core::error::{MangoonError, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Entry extensions treated as pages
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Content type used for anything outside the image table
pub const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// One page extracted from an archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchivePage {
    /// Basename of the archive entry
    pub name: String,
    /// Raw image bytes
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Lowercase extension without the dot
    pub extension: String,
    /// Position of the entry inside the container
    pub index: usize,
}

impl ArchivePage {
    /// Content type for serving this page
    pub fn mime_type(&self) -> &'static str {
        mime_type_for(&self.extension)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.data.len()
    }
}

/// Map a file extension to the content type served for it
pub fn mime_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        _ => FALLBACK_MIME_TYPE,
    }
}

/// Read-only page access for CBZ files
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveReader;

impl ArchiveReader {
    pub fn new() -> Self {
        Self
    }

    /// List the pages of an archive in reading order
    ///
    /// An archive that cannot be opened yields no pages.
    pub fn list_pages(&self, path: &Path) -> Vec<ArchivePage> {
        match self.try_list_pages(path) {
            Ok(pages) => pages,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Treating unreadable archive as empty");
                Vec::new()
            }
        }
    }

    /// List pages, reporting why the container could not be opened
    pub fn try_list_pages(&self, path: &Path) -> Result<Vec<ArchivePage>> {
        let file = File::open(path)
            .map_err(|e| MangoonError::ArchiveOpenError(format!("{}: {}", path.display(), e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| MangoonError::ArchiveOpenError(format!("{}: {}", path.display(), e)))?;

        let mut pages = Vec::new();
        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %path.display(), index, error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if entry.is_dir() {
                continue;
            }

            let Some((name, extension)) = page_name(entry.name()) else {
                debug!(entry = entry.name(), "Skipping non-image entry");
                continue;
            };

            let mut data = Vec::with_capacity(entry.size() as usize);
            if let Err(e) = entry.read_to_end(&mut data) {
                warn!(path = %path.display(), entry = %name, error = %e, "Skipping truncated entry");
                continue;
            }

            pages.push(ArchivePage {
                name,
                data,
                extension,
                index,
            });
        }

        sort_pages(&mut pages);
        Ok(pages)
    }

    /// Fetch the page at `index` of the naturally sorted sequence
    ///
    /// Negative or out-of-range indices give `None`.
    pub fn get_page(&self, path: &Path, index: i64) -> Option<ArchivePage> {
        let index = usize::try_from(index).ok()?;
        let mut pages = self.list_pages(path);
        if index >= pages.len() {
            return None;
        }
        Some(pages.swap_remove(index))
    }

    /// Number of pages in the archive (zero when it cannot be opened)
    pub fn page_count(&self, path: &Path) -> usize {
        self.list_pages(path).len()
    }
}

/// Basename and lowercase extension of an entry, if it is a page image
fn page_name(entry_name: &str) -> Option<(String, String)> {
    let basename = Path::new(entry_name).file_name()?.to_str()?;
    let extension = Path::new(basename).extension()?.to_str()?.to_ascii_lowercase();

    IMAGE_EXTENSIONS
        .contains(&extension.as_str())
        .then(|| (basename.to_string(), extension))
}

fn sort_pages(pages: &mut [ArchivePage]) {
    pages.sort_by(|a, b| natord::compare(&a.name, &b.name));
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use zip::write::SimpleFileOptions;

    fn create_cbz(entries: &[(&str, &[u8])]) -> NamedTempFile {
        let file = NamedTempFile::new().unwrap();
        let mut zip = zip::ZipWriter::new(file.reopen().unwrap());
        for (name, data) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
        file
    }

    fn names(pages: &[ArchivePage]) -> Vec<&str> {
        pages.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn test_pages_are_naturally_sorted() {
        let cbz = create_cbz(&[
            ("p1.jpg", b"one"),
            ("p10.jpg", b"ten"),
            ("p2.jpg", b"two"),
        ]);

        let pages = ArchiveReader::new().list_pages(cbz.path());
        assert_eq!(names(&pages), vec!["p1.jpg", "p2.jpg", "p10.jpg"]);
        assert_eq!(pages[2].data, b"ten");
        assert_eq!(pages[2].index, 1);
    }

    #[test]
    fn test_non_image_entries_are_excluded() {
        let cbz = create_cbz(&[
            ("cover.jpg", b"cover"),
            ("info.xml", b"<ComicInfo/>"),
            ("01.png", b"page"),
        ]);

        let pages = ArchiveReader::new().list_pages(cbz.path());
        assert_eq!(pages.len(), 2);
        assert!(pages.iter().all(|p| p.name != "info.xml"));
    }

    #[test]
    fn test_nested_entries_use_basename_and_lowercase_extension() {
        let cbz = create_cbz(&[
            ("chapter-3/", b""),
            ("chapter-3/page2.PNG", b"x"),
            ("chapter-3/page1.JPEG", b"y"),
        ]);

        let pages = ArchiveReader::new().list_pages(cbz.path());
        assert_eq!(names(&pages), vec!["page1.JPEG", "page2.PNG"]);
        assert_eq!(pages[0].extension, "jpeg");
        assert_eq!(pages[0].mime_type(), "image/jpeg");
        assert_eq!(pages[1].mime_type(), "image/png");
    }

    #[test]
    fn test_corrupt_archive_yields_no_pages() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"this is definitely not a zip container").unwrap();

        let reader = ArchiveReader::new();
        assert!(reader.list_pages(file.path()).is_empty());
        assert!(matches!(
            reader.try_list_pages(file.path()),
            Err(MangoonError::ArchiveOpenError(_))
        ));
    }

    #[test]
    fn test_missing_archive_yields_no_pages() {
        let reader = ArchiveReader::new();
        assert!(reader.list_pages(Path::new("/no/such/chapter.cbz")).is_empty());
        assert_eq!(reader.page_count(Path::new("/no/such/chapter.cbz")), 0);
    }

    #[test]
    fn test_get_page_bounds() {
        let cbz = create_cbz(&[("p10.jpg", b"ten"), ("p2.jpg", b"two"), ("p1.jpg", b"one")]);
        let reader = ArchiveReader::new();

        assert!(reader.get_page(cbz.path(), -1).is_none());
        assert!(reader.get_page(cbz.path(), 3).is_none());

        let first = reader.get_page(cbz.path(), 0).unwrap();
        assert_eq!(first.name, "p1.jpg");
        assert_eq!(first.data, b"one");

        let last = reader.get_page(cbz.path(), 2).unwrap();
        assert_eq!(last.name, "p10.jpg");
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_type_for("jpg"), "image/jpeg");
        assert_eq!(mime_type_for("JPEG"), "image/jpeg");
        assert_eq!(mime_type_for("gif"), "image/gif");
        assert_eq!(mime_type_for("webp"), "image/webp");
        assert_eq!(mime_type_for("bmp"), "image/bmp");
        assert_eq!(mime_type_for("tiff"), FALLBACK_MIME_TYPE);
        assert_eq!(mime_type_for(""), FALLBACK_MIME_TYPE);
    }

    proptest! {
        #[test]
        fn prop_numbered_pages_sort_numerically(numbers in proptest::collection::vec(0u32..100_000, 1..40)) {
            let mut pages: Vec<ArchivePage> = numbers
                .iter()
                .enumerate()
                .map(|(index, n)| ArchivePage {
                    name: format!("p{}.jpg", n),
                    data: Vec::new(),
                    extension: "jpg".to_string(),
                    index,
                })
                .collect();

            sort_pages(&mut pages);

            let sorted: Vec<u32> = pages
                .iter()
                .map(|p| p.name.trim_start_matches('p').trim_end_matches(".jpg").parse().unwrap())
                .collect();
            let mut expected = numbers.clone();
            expected.sort_unstable();
            prop_assert_eq!(sorted, expected);
        }
    }
}
