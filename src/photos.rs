use std::path::{Path, PathBuf};

/// Extensions probed, in order, for an item photo.
pub const PHOTO_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "JPG", "JPEG", "PNG"];

const MIN_LOCATION_LEN: usize = 6;

/// Photo directory tree rooted at `root`, laid out as
/// `<stand>/<4-char prefix>/<6-char prefix>/<code>.<ext>` from the location code.
#[derive(Debug, Clone)]
pub struct PhotoLibrary {
    root: PathBuf,
}

impl PhotoLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PhotoLibrary { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the photo of `code` stored under the directory derived from
    /// `location_code`.
    ///
    /// Returns the path relative to the photo root, using `/` separators, or
    /// `None` when the location code is too short, the code cannot name a
    /// file, or no file exists for any known extension. The filesystem is
    /// checked on every call.
    ///
    /// # Examples
    /// ```no_run
    /// use inventario::photos::PhotoLibrary;
    ///
    /// let photos = PhotoLibrary::new("fotos");
    /// // looks for fotos/1/1234/123456/A-01.jpg, .jpeg, .png, ...
    /// let found = photos.build_foto_path("A-01", "1234567");
    /// ```
    pub fn build_foto_path(&self, code: &str, location_code: &str) -> Option<String> {
        let code = code.trim();
        let location: Vec<char> = location_code.trim().chars().collect();
        if location.len() < MIN_LOCATION_LEN || !is_safe_segment(code) {
            return None;
        }

        let stand: String = location[..1].iter().collect();
        let block: String = location[..4].iter().collect();
        let shelf: String = location[..6].iter().collect();
        if ![&stand, &block, &shelf].iter().all(|s| is_safe_segment(s)) {
            return None;
        }

        let directory = self.root.join(&stand).join(&block).join(&shelf);
        PHOTO_EXTENSIONS.iter().find_map(|ext| {
            let file_name = format!("{}.{}", code, ext);
            if directory.join(&file_name).is_file() {
                Some(format!("{}/{}/{}/{}", stand, block, shelf, file_name))
            } else {
                None
            }
        })
    }
}

// A path segment that stays inside its parent directory.
fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn library_with(files: &[&str]) -> (tempfile::TempDir, PhotoLibrary) {
        let dir = tempfile::tempdir().unwrap();
        for file in files {
            let path = dir.path().join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"img").unwrap();
        }
        let library = PhotoLibrary::new(dir.path());
        (dir, library)
    }

    #[test]
    fn finds_photo_under_location_prefixes() {
        let (_dir, photos) = library_with(&["1/1234/123456/A-01.png"]);
        assert_eq!(
            photos.build_foto_path(" A-01 ", "1234567"),
            Some("1/1234/123456/A-01.png".to_string())
        );
    }

    #[test]
    fn earlier_extension_wins() {
        let (_dir, photos) = library_with(&["1/1234/123456/A-01.png", "1/1234/123456/A-01.jpg"]);
        assert_eq!(
            photos.build_foto_path("A-01", "123456"),
            Some("1/1234/123456/A-01.jpg".to_string())
        );
    }

    #[test]
    fn short_location_or_missing_file_gives_none() {
        let (_dir, photos) = library_with(&["1/1234/123456/A-01.jpg"]);
        assert_eq!(photos.build_foto_path("A-01", "12345"), None);
        assert_eq!(photos.build_foto_path("A-01", ""), None);
        assert_eq!(photos.build_foto_path("B-02", "1234567"), None);
        assert_eq!(photos.build_foto_path("A-01", "9234567"), None);
    }

    #[test]
    fn codes_cannot_escape_the_root() {
        let (_dir, photos) = library_with(&["1/1234/secret.jpg"]);
        assert_eq!(photos.build_foto_path("../secret", "1234567"), None);
        assert_eq!(photos.build_foto_path("..", "1234567"), None);
        assert_eq!(photos.build_foto_path("A-01", "1/3456"), None);
    }
}
