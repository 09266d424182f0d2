//! Trajectory files.
//!
//! One pose per line, earliest frame first, no header. Values are the
//! camera-to-world matrix in row-major order separated by single spaces:
//! - `Kitti12`: the top 3x4 block `r11 r12 r13 t1 r21 r22 r23 t2 r31 r32 r33 t3`
//! - `Full16`: all sixteen entries, bottom row included

use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Trim, WriterBuilder};
use nalgebra::Matrix4;
use serde::Deserialize;

use crate::error::{Result, VoError};
use crate::geometry::SE3;
use crate::odometry::{Trajectory, TrajectoryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum TrajectoryFormat {
    #[default]
    Kitti12,
    Full16,
}

impl TrajectoryFormat {
    fn rows(self) -> usize {
        match self {
            TrajectoryFormat::Kitti12 => 3,
            TrajectoryFormat::Full16 => 4,
        }
    }
}

/// Write `trajectory` to `path`, creating parent directories as needed.
pub fn write_trajectory(trajectory: &Trajectory, path: &Path, format: TrajectoryFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| VoError::io(parent, e))?;
    }

    let mut wtr = WriterBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .from_path(path)
        .map_err(|e| VoError::io(path, e.into()))?;

    for pose in trajectory.poses() {
        let mat = pose.to_matrix();
        let record: Vec<String> = (0..format.rows())
            .flat_map(|r| (0..4).map(move |c| (r, c)))
            .map(|(r, c)| format!("{:e}", mat[(r, c)]))
            .collect();
        wtr.write_record(&record)
            .map_err(|e| VoError::io(path, e.into()))?;
    }
    wtr.flush().map_err(|e| VoError::io(path, e))
}

/// Read poses written by [`write_trajectory`] (either width).
pub fn read_poses(path: &Path) -> Result<Vec<SE3>> {
    let mut rdr = ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .comment(Some(b'#'))
        .from_path(path)
        .map_err(|e| VoError::io(path, e.into()))?;

    let mut poses = Vec::new();
    for (line, rec) in rdr.records().enumerate() {
        let rec = rec.map_err(|e| VoError::io(path, e.into()))?;
        let values = rec
            .iter()
            .filter(|f| !f.is_empty())
            .map(|f| f.parse::<f64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| invalid_data(path, format!("line {}: {e}", line + 1)))?;

        let mut mat = Matrix4::identity();
        match values.len() {
            12 | 16 => {
                for (i, v) in values.iter().enumerate() {
                    mat[(i / 4, i % 4)] = *v;
                }
            }
            n => {
                return Err(invalid_data(
                    path,
                    format!("line {}: expected 12 or 16 values, found {n}", line + 1),
                ))
            }
        }

        let pose = SE3::from_rigid_matrix(&mat).ok_or_else(|| {
            invalid_data(path, format!("line {}: not a rigid transform", line + 1))
        })?;
        poses.push(pose);
    }
    Ok(poses)
}

pub fn read_trajectory(path: &Path, kind: TrajectoryKind) -> Result<Trajectory> {
    Ok(Trajectory::from_poses(kind, read_poses(path)?))
}

fn invalid_data(path: &Path, msg: String) -> VoError {
    VoError::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, msg))
}

/// Run identifier taken from the image-list filename.
///
/// KITTI list files end in `NN_xxxxx.x`-style suffixes; the two characters at
/// `len-10 .. len-8` name the sequence. Shorter names fall back to the stem.
pub fn run_id_from_list(list_path: &Path) -> String {
    let name = list_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let chars: Vec<char> = name.chars().collect();
    if chars.len() >= 10 {
        let start = chars.len() - 10;
        return chars[start..start + 2].iter().collect();
    }
    list_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "run".to_string())
}

/// Output files for a run: `(direct, refined)`.
pub fn output_paths(output_folder: &Path, run_id: &str) -> (PathBuf, PathBuf) {
    (
        output_folder.join(format!("{run_id}.txt")),
        output_folder.join(format!("{run_id}_ba.txt")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odometry::accumulate;
    use approx::assert_relative_eq;
    use nalgebra::{UnitQuaternion, Vector3};

    fn sample_trajectory() -> Trajectory {
        let step = SE3 {
            rotation: UnitQuaternion::from_euler_angles(0.02, -0.01, 0.03),
            translation: Vector3::new(0.1, -0.02, -0.95),
        };
        let mut traj = Trajectory::new(TrajectoryKind::Direct);
        for _ in 0..6 {
            let next = accumulate(&traj.last(), &step);
            traj.push(next);
        }
        traj
    }

    #[test]
    fn test_write_then_read_reproduces_poses() {
        let dir = tempfile::tempdir().unwrap();
        let traj = sample_trajectory();

        for format in [TrajectoryFormat::Kitti12, TrajectoryFormat::Full16] {
            let path = dir.path().join(format!("{format:?}.txt"));
            write_trajectory(&traj, &path, format).unwrap();
            let back = read_trajectory(&path, TrajectoryKind::Direct).unwrap();
            assert_eq!(back.len(), traj.len());
            for (a, b) in back.poses().iter().zip(traj.poses()) {
                assert_relative_eq!(a.to_matrix(), b.to_matrix(), epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_line_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/00.txt");
        let mut traj = Trajectory::new(TrajectoryKind::Direct);
        traj.push(SE3::from_translation(Vector3::new(1.0, 2.0, 3.0)));
        write_trajectory(&traj, &path, TrajectoryFormat::Kitti12).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let values: Vec<f64> = lines[1]
            .split(' ')
            .map(|v| v.parse().unwrap())
            .collect();
        assert_eq!(values.len(), 12);
        assert_eq!(values[3], 1.0);
        assert_eq!(values[7], 2.0);
        assert_eq!(values[11], 3.0);
    }

    #[test]
    fn test_unwritable_path_is_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let traj = Trajectory::new(TrajectoryKind::Direct);
        let result = write_trajectory(&traj, &blocker.join("sub/00.txt"), TrajectoryFormat::Kitti12);
        assert!(matches!(result, Err(VoError::Io { .. })));
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "1 0 0 0 0 1 0 0 0 0 1\n").unwrap();
        assert!(read_poses(&path).is_err());
    }

    #[test]
    fn test_run_id_from_list_name() {
        assert_eq!(run_id_from_list(Path::new("/lists/kitti_07_lst.xml")), "07");
        assert_eq!(run_id_from_list(Path::new("seq.txt")), "seq");
        let (direct, refined) = output_paths(Path::new("out_vo"), "07");
        assert_eq!(direct, PathBuf::from("out_vo/07.txt"));
        assert_eq!(refined, PathBuf::from("out_vo/07_ba.txt"));
    }
}
