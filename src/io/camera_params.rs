//! Camera parameter file.
//!
//! Five whitespace separated numbers in fixed order:
//! `f  reserved  cu  cv  baseline`.

use std::path::Path;

use crate::error::{Result, VoError};
use crate::frame::CameraModel;

const NUM_FIELDS: usize = 5;

pub fn load_camera_params(path: &Path) -> Result<CameraModel> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| VoError::Config(format!("cannot open camera params {}: {e}", path.display())))?;
    parse_camera_params(&text)
        .map_err(|reason| VoError::Config(format!("{}: {reason}", path.display())))
}

fn parse_camera_params(text: &str) -> std::result::Result<CameraModel, String> {
    let values = text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .take(NUM_FIELDS)
        .map(|s| s.parse::<f64>().map_err(|e| format!("bad number {s:?}: {e}")))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if values.len() < NUM_FIELDS {
        return Err(format!("expected {NUM_FIELDS} values, found {}", values.len()));
    }
    let cam = CameraModel::new(values[0], values[2], values[3], values[4]);
    if cam.f <= 0.0 || cam.baseline <= 0.0 {
        return Err(format!(
            "focal length and baseline must be positive (f={}, baseline={})",
            cam.f, cam.baseline
        ));
    }
    Ok(cam)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_fixed_order() {
        let cam = parse_camera_params("718.856\n718.856\n607.1928\n185.2157\n0.53715").unwrap();
        assert_eq!(cam.f, 718.856);
        assert_eq!(cam.cu, 607.1928);
        assert_eq!(cam.cv, 185.2157);
        assert_eq!(cam.baseline, 0.53715);
    }

    #[test]
    fn test_rejects_short_or_garbage_input() {
        assert!(parse_camera_params("1 2 3").is_err());
        assert!(parse_camera_params("1 2 x 4 5").is_err());
        assert!(parse_camera_params("0 0 1 1 0.5").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "500 500 320 240 0.12").unwrap();
        let cam = load_camera_params(file.path()).unwrap();
        assert_eq!(cam.baseline, 0.12);

        let missing = load_camera_params(Path::new("/nonexistent/camera.txt"));
        assert!(matches!(missing, Err(VoError::Config(_))));
    }
}
