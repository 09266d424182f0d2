use std::path::Path;

use csv::ReaderBuilder;

use crate::error::{Result, VoError};

/// Read an alternating left/right image list, one filename per line.
///
/// Lines starting with `#` and blank lines are skipped. The list must be
/// non-empty and contain complete pairs.
pub fn load_image_list(path: &Path) -> Result<Vec<String>> {
    let list_error = |reason: String| VoError::ListRead {
        path: path.to_path_buf(),
        reason,
    };

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)
        .map_err(|e| list_error(e.to_string()))?;

    let mut entries = Vec::new();
    for rec in rdr.records() {
        let rec = rec.map_err(|e| list_error(e.to_string()))?;
        let Some(name) = rec.get(0).map(str::trim) else {
            continue;
        };
        if !name.is_empty() {
            entries.push(name.to_string());
        }
    }

    if entries.is_empty() {
        return Err(list_error("the image list is empty".to_string()));
    }
    if entries.len() % 2 != 0 {
        return Err(list_error(format!(
            "{} entries do not form left/right pairs",
            entries.len()
        )));
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn list_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_reads_entries_skipping_comments() {
        let file = list_file("# kitti 07\nimage_0/000000.png\nimage_1/000000.png\n\nimage_0/000001.png\nimage_1/000001.png\n");
        let entries = load_image_list(file.path()).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[1], "image_1/000000.png");
    }

    #[test]
    fn test_empty_list_is_an_error() {
        let file = list_file("# nothing here\n");
        assert!(matches!(
            load_image_list(file.path()),
            Err(VoError::ListRead { .. })
        ));
    }

    #[test]
    fn test_odd_list_is_an_error() {
        let file = list_file("a.png\nb.png\nc.png\n");
        assert!(load_image_list(file.path()).is_err());
    }

    #[test]
    fn test_missing_list_is_an_error() {
        assert!(matches!(
            load_image_list(Path::new("/nonexistent/list.txt")),
            Err(VoError::ListRead { .. })
        ));
    }
}
