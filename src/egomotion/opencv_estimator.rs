//! ORB-based stereo egomotion on top of OpenCV.
//!
//! Per pair: ORB features in both images, left/right matching along the
//! epipolar row, then temporal matching of the left descriptors against the
//! previous pair. Previous-frame points are triangulated and the current pose
//! is recovered with PnP RANSAC, which directly yields the previous-to-current
//! transform.

use std::path::Path;

use anyhow::{bail, Context, Result};
use nalgebra::{Matrix3, Matrix4, Point2, Vector3};
use opencv::calib3d;
use opencv::core::{
    DMatch, KeyPoint, Mat, Point2f, Point3d, Ptr, Size, TermCriteria, TermCriteria_Type, Vector,
    NORM_HAMMING,
};
use opencv::features2d;
use opencv::imgcodecs::{self, IMREAD_GRAYSCALE};
use opencv::imgproc;
use opencv::prelude::*;
use tracing::debug;

use super::adapter::StereoMotionEstimator;
use super::types::{Correspondence, EstimatorError, RawMotion, TrackId};
use crate::frame::{CameraModel, ImageDims, ImageLoader, StereoPair};

/// Max Hamming distance accepted for a left/right match.
const TH_HIGH: u32 = 100;
const RATIO: f32 = 0.9;
const VERTICAL_MARGIN: f32 = 2.0;
const MIN_DEPTH: f64 = 0.5;
const MAX_DEPTH: f64 = 80.0;
const RANSAC_ITERATIONS: i32 = 200;
const RANSAC_REPROJ_PX: f32 = 2.0;

/// Grayscale image loader.
pub struct OpencvImageLoader;

impl ImageLoader for OpencvImageLoader {
    type Image = Mat;

    fn load(&self, path: &Path) -> Result<(Mat, ImageDims)> {
        let name = path
            .to_str()
            .with_context(|| format!("non UTF-8 image path {}", path.display()))?;
        let image = imgcodecs::imread(name, IMREAD_GRAYSCALE)
            .with_context(|| format!("imread failed for {}", path.display()))?;
        if image.empty() {
            bail!("could not decode {}", path.display());
        }
        let dims = ImageDims {
            width: image.cols() as u32,
            height: image.rows() as u32,
            stride: image.step1(0)? as u32,
        };
        Ok((image, dims))
    }
}

/// A stereo-matched feature of one pair.
struct StereoPoint {
    left: Point2<f64>,
    right: Point2<f64>,
    track_id: TrackId,
}

/// Features of one pair, descriptors row-aligned with `points`.
struct PairFeatures {
    index: usize,
    points: Vec<StereoPoint>,
    descriptors: Mat,
}

pub struct OrbStereoEstimator {
    orb: Ptr<features2d::ORB>,
    matcher: Ptr<features2d::BFMatcher>,
    camera: CameraModel,
    /// Refine stereo matches to sub-pixel accuracy before estimation.
    subpixel: bool,
    min_inliers: usize,
    previous: Option<PairFeatures>,
    next_track: u64,
}

impl OrbStereoEstimator {
    pub fn new(camera: CameraModel, n_features: i32, subpixel: bool) -> Result<Self> {
        let orb = features2d::ORB::create(
            n_features,
            1.2,
            8,
            31,
            0,
            2,
            features2d::ORB_ScoreType::HARRIS_SCORE,
            31,
            20,
        )?;
        let matcher = features2d::BFMatcher::create(NORM_HAMMING, true)?;
        Ok(Self {
            orb,
            matcher,
            camera,
            subpixel,
            min_inliers: 6,
            previous: None,
            next_track: 0,
        })
    }

    fn detect(&mut self, image: &Mat) -> Result<(Vector<KeyPoint>, Mat)> {
        let mut keypoints = Vector::<KeyPoint>::new();
        let mut descriptors = Mat::default();
        self.orb
            .detect_and_compute(image, &Mat::default(), &mut keypoints, &mut descriptors, false)?;
        Ok((keypoints, descriptors))
    }

    fn extract(&mut self, pair: &StereoPair<Mat>) -> Result<PairFeatures> {
        let (left_kp, left_desc) = self.detect(&pair.left)?;
        let (right_kp, right_desc) = self.detect(&pair.right)?;

        let max_disparity = (self.camera.f * self.camera.baseline / MIN_DEPTH) as f32;
        let min_disparity = (self.camera.f * self.camera.baseline / MAX_DEPTH) as f32;

        let mut left_pts = Vector::<Point2f>::new();
        let mut right_pts = Vector::<Point2f>::new();
        let mut descriptors = Mat::default();

        for (li, lkp) in left_kp.iter().enumerate() {
            let (ul, vl) = (lkp.pt().x, lkp.pt().y);
            let left_row = left_desc.row(li as i32)?;

            let mut best = (TH_HIGH, None::<usize>);
            let mut second = TH_HIGH;
            for (ri, rkp) in right_kp.iter().enumerate() {
                let (ur, vr) = (rkp.pt().x, rkp.pt().y);
                let disparity = ul - ur;
                if (vl - vr).abs() > VERTICAL_MARGIN
                    || disparity < min_disparity
                    || disparity > max_disparity
                {
                    continue;
                }
                let dist = hamming(&left_row, &right_desc.row(ri as i32)?)?;
                if dist < best.0 {
                    second = best.0;
                    best = (dist, Some(ri));
                } else if dist < second {
                    second = dist;
                }
            }

            if let (dist, Some(ri)) = best {
                if (dist as f32) < RATIO * second as f32 || second == TH_HIGH {
                    left_pts.push(lkp.pt());
                    right_pts.push(right_kp.get(ri)?.pt());
                    descriptors.push_back(&left_row)?;
                }
            }
        }

        if self.subpixel && !left_pts.is_empty() {
            refine_corners(&pair.left, &mut left_pts)?;
            refine_corners(&pair.right, &mut right_pts)?;
        }

        let points = left_pts
            .iter()
            .zip(right_pts.iter())
            .map(|(l, r)| StereoPoint {
                left: Point2::new(l.x as f64, l.y as f64),
                right: Point2::new(r.x as f64, r.y as f64),
                track_id: TrackId(0),
            })
            .collect();

        Ok(PairFeatures {
            index: pair.index,
            points,
            descriptors,
        })
    }

    fn new_track(&mut self) -> TrackId {
        let id = TrackId(self.next_track);
        self.next_track += 1;
        id
    }

    fn estimate_inner(&mut self, prev: &StereoPair<Mat>, curr: &StereoPair<Mat>) -> Result<RawMotion> {
        let previous = match self.previous.take() {
            Some(p) if p.index == prev.index => p,
            _ => {
                let mut p = self.extract(prev)?;
                for point in &mut p.points {
                    point.track_id = self.new_track();
                }
                p
            }
        };
        let mut current = self.extract(curr)?;

        let mut temporal = Vector::<DMatch>::new();
        if !previous.points.is_empty() && !current.points.is_empty() {
            self.matcher.train_match(
                &current.descriptors,
                &previous.descriptors,
                &mut temporal,
                &Mat::default(),
            )?;
        }

        let mut matched = vec![false; current.points.len()];
        let mut matches = Vec::with_capacity(temporal.len());
        for m in temporal.iter() {
            if m.distance as u32 > TH_HIGH {
                continue;
            }
            let (ci, pi) = (m.query_idx as usize, m.train_idx as usize);
            let (Some(c), Some(p)) = (current.points.get_mut(ci), previous.points.get(pi)) else {
                continue;
            };
            c.track_id = p.track_id;
            matched[ci] = true;
            matches.push(Correspondence {
                track_id: p.track_id,
                left_prev: p.left,
                right_prev: p.right,
                left_curr: c.left,
                right_curr: c.right,
            });
        }
        for (ci, was_matched) in matched.into_iter().enumerate() {
            if !was_matched {
                current.points[ci].track_id = self.new_track();
            }
        }
        self.previous = Some(current);

        let usable: Vec<(usize, Vector3<f64>)> = matches
            .iter()
            .enumerate()
            .filter_map(|(i, c)| self.camera.triangulate(&c.left_prev, &c.right_prev).map(|p| (i, p)))
            .collect();
        debug!(
            frame = curr.index,
            matches = matches.len(),
            triangulated = usable.len(),
            "temporal matching"
        );
        if usable.len() < self.min_inliers {
            return Err(anyhow::Error::new(Insufficient(matches.len(), 0)));
        }

        let object: Vec<Point3d> = usable.iter().map(|(_, p)| Point3d::new(p.x, p.y, p.z)).collect();
        let image: Vec<Point2f> = usable
            .iter()
            .map(|(i, _)| Point2f::new(matches[*i].left_curr.x as f32, matches[*i].left_curr.y as f32))
            .collect();
        let (relative, ransac_inliers) = solve_pnp(&object, &image, &self.camera)?;

        let inliers: Vec<usize> = ransac_inliers
            .into_iter()
            .filter_map(|k| usable.get(k).map(|(i, _)| *i))
            .collect();
        if inliers.len() < self.min_inliers {
            return Err(anyhow::Error::new(Insufficient(matches.len(), inliers.len())));
        }

        Ok(RawMotion {
            relative,
            matches,
            inliers,
        })
    }
}

/// Too few matches or inliers, carried through `anyhow` to the trait boundary.
#[derive(Debug, thiserror::Error)]
#[error("too few inliers ({1} of {0} matches)")]
struct Insufficient(usize, usize);

impl StereoMotionEstimator for OrbStereoEstimator {
    type Image = Mat;

    fn prime(&mut self, first: &StereoPair<Mat>) -> std::result::Result<(), EstimatorError> {
        let mut features = self
            .extract(first)
            .map_err(|e| EstimatorError::degenerate(format!("{e:#}")))?;
        for point in &mut features.points {
            point.track_id = self.new_track();
        }
        self.previous = Some(features);
        Ok(())
    }

    fn estimate(
        &mut self,
        prev: &StereoPair<Mat>,
        curr: &StereoPair<Mat>,
        _dims: ImageDims,
    ) -> std::result::Result<RawMotion, EstimatorError> {
        match self.estimate_inner(prev, curr) {
            Ok(motion) => Ok(motion),
            Err(e) => match e.downcast_ref::<Insufficient>() {
                Some(Insufficient(m, i)) => Err(EstimatorError::insufficient(*m, *i)),
                None => Err(EstimatorError::degenerate(format!("{e:#}"))),
            },
        }
    }
}

fn refine_corners(image: &Mat, points: &mut Vector<Point2f>) -> Result<()> {
    let criteria = TermCriteria::new(
        TermCriteria_Type::COUNT as i32 + TermCriteria_Type::EPS as i32,
        20,
        0.03,
    )?;
    imgproc::corner_sub_pix(image, points, Size::new(5, 5), Size::new(-1, -1), criteria)?;
    Ok(())
}

/// Hamming distance between two binary descriptor rows.
fn hamming(a: &impl MatTraitConst, b: &impl MatTraitConst) -> Result<u32> {
    let mut dist = 0u32;
    for j in 0..a.cols().min(b.cols()) {
        dist += (*a.at_2d::<u8>(0, j)? ^ *b.at_2d::<u8>(0, j)?).count_ones();
    }
    Ok(dist)
}

/// PnP RANSAC on points expressed in the previous camera. Returns the
/// previous-to-current transform and the inlier indices.
fn solve_pnp(object: &[Point3d], image: &[Point2f], camera: &CameraModel) -> Result<(Matrix4<f64>, Vec<usize>)> {
    let obj_points = Mat::from_slice(object)?.try_clone()?;
    let img_points = Mat::from_slice(image)?.try_clone()?;
    let camera_matrix = Mat::from_slice_2d(&[
        [camera.f, 0.0, camera.cu],
        [0.0, camera.f, camera.cv],
        [0.0, 0.0, 1.0],
    ])?;
    let dist_coeffs = Mat::zeros(1, 5, opencv::core::CV_64F)?.to_mat()?;

    let mut rvec = Mat::default();
    let mut tvec = Mat::default();
    let mut inliers = Mat::default();
    let found = calib3d::solve_pnp_ransac(
        &obj_points,
        &img_points,
        &camera_matrix,
        &dist_coeffs,
        &mut rvec,
        &mut tvec,
        false,
        RANSAC_ITERATIONS,
        RANSAC_REPROJ_PX,
        0.999,
        &mut inliers,
        calib3d::SOLVEPNP_ITERATIVE,
    )?;
    if !found {
        bail!("PnP RANSAC found no consensus");
    }

    let mut rot = Mat::default();
    calib3d::rodrigues(&rvec, &mut rot, &mut opencv::core::no_array())?;
    let mut r = [0.0f64; 9];
    for (i, v) in r.iter_mut().enumerate() {
        *v = *rot.at::<f64>(i as i32)?;
    }
    let rotation = Matrix3::from_row_slice(&r);
    let translation = Vector3::new(
        *tvec.at::<f64>(0)?,
        *tvec.at::<f64>(1)?,
        *tvec.at::<f64>(2)?,
    );

    let mut relative = Matrix4::identity();
    relative.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    relative.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);

    let indices = (0..inliers.rows())
        .map(|k| inliers.at::<i32>(k).map(|v| *v as usize))
        .collect::<opencv::Result<Vec<_>>>()?;
    Ok((relative, indices))
}
