//! File formats: camera parameters, image lists, trajectories.

pub mod camera_params;
pub mod image_list;
pub mod trajectory;

pub use camera_params::load_camera_params;
pub use image_list::load_image_list;
pub use trajectory::{
    output_paths, read_poses, read_trajectory, run_id_from_list, write_trajectory,
    TrajectoryFormat,
};
