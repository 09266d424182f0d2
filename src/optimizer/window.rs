//! Bounded window of recent frames and the feature tracks that link them.

use std::collections::{BTreeMap, VecDeque};

use nalgebra::Point2;

use crate::egomotion::{Correspondence, TrackId};
use crate::geometry::SE3;

/// A feature seen in both images of one stereo pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StereoObservation {
    pub left: Point2<f64>,
    pub right: Point2<f64>,
}

/// One feature followed across frames of the window.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub id: TrackId,
    /// Keyed by frame index.
    pub observations: BTreeMap<usize, StereoObservation>,
}

impl Track {
    fn new(id: TrackId) -> Self {
        Self {
            id,
            observations: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WindowFrame<I> {
    pub frame_index: usize,
    pub images: I,
    /// Direct estimate of this camera expressed in the previous camera
    /// (camera-to-previous). Identity for a frame with no predecessor.
    pub motion: SE3,
    /// Tracks observed in this frame.
    pub tracks: Vec<TrackId>,
}

/// Image-free copy of the window, what the solver works on.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSnapshot {
    pub frames: Vec<SnapshotFrame>,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotFrame {
    pub frame_index: usize,
    pub motion: SE3,
}

impl WindowSnapshot {
    /// Position of a frame index inside the snapshot.
    pub fn slot_of(&self, frame_index: usize) -> Option<usize> {
        self.frames.iter().position(|f| f.frame_index == frame_index)
    }

    /// Direct camera-to-anchor pose of every frame, chaining the motions.
    pub fn chained_poses(&self) -> Vec<SE3> {
        let mut poses = Vec::with_capacity(self.frames.len());
        let mut pose = SE3::identity();
        for (slot, frame) in self.frames.iter().enumerate() {
            if slot > 0 {
                pose = pose.compose(&frame.motion);
            }
            poses.push(pose);
        }
        poses
    }
}

/// FIFO of at most `capacity` frames.
#[derive(Debug, Clone)]
pub struct Window<I> {
    capacity: usize,
    frames: VecDeque<WindowFrame<I>>,
    tracks: BTreeMap<TrackId, Track>,
}

impl<I> Window<I> {
    /// `capacity` is clamped to at least 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            frames: VecDeque::with_capacity(capacity + 1),
            tracks: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() == self.capacity
    }

    pub fn frames(&self) -> impl Iterator<Item = &WindowFrame<I>> {
        self.frames.iter()
    }

    pub fn frame(&self, slot: usize) -> Option<&WindowFrame<I>> {
        self.frames.get(slot)
    }

    /// Most recently pushed frame.
    pub fn latest(&self) -> Option<&WindowFrame<I>> {
        self.frames.back()
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Append a frame. `correspondences` link it to the frame pushed before;
    /// their previous-side observation is recorded on that frame when it is
    /// still in the window. Returns the evicted frame, if any.
    pub fn push(
        &mut self,
        frame_index: usize,
        images: I,
        motion: SE3,
        correspondences: &[Correspondence],
    ) -> Option<WindowFrame<I>> {
        let prev_index = self.frames.back().map(|f| f.frame_index);
        let mut observed = Vec::with_capacity(correspondences.len());

        for c in correspondences {
            let track = self
                .tracks
                .entry(c.track_id)
                .or_insert_with(|| Track::new(c.track_id));

            if let Some(prev) = prev_index {
                if !track.observations.contains_key(&prev) {
                    track.observations.insert(
                        prev,
                        StereoObservation {
                            left: c.left_prev,
                            right: c.right_prev,
                        },
                    );
                    if let Some(prev_frame) = self.frames.back_mut() {
                        prev_frame.tracks.push(c.track_id);
                    }
                }
            }
            track.observations.insert(
                frame_index,
                StereoObservation {
                    left: c.left_curr,
                    right: c.right_curr,
                },
            );
            observed.push(c.track_id);
        }

        self.frames.push_back(WindowFrame {
            frame_index,
            images,
            motion,
            tracks: observed,
        });

        if self.frames.len() > self.capacity {
            self.evict_oldest()
        } else {
            None
        }
    }

    fn evict_oldest(&mut self) -> Option<WindowFrame<I>> {
        let evicted = self.frames.pop_front()?;
        for id in &evicted.tracks {
            let now_empty = match self.tracks.get_mut(id) {
                Some(track) => {
                    track.observations.remove(&evicted.frame_index);
                    track.observations.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.tracks.remove(id);
            }
        }
        Some(evicted)
    }

    /// Forget a track entirely (the tracker dropped it).
    pub fn remove_track(&mut self, id: TrackId) -> Option<Track> {
        let track = self.tracks.remove(&id)?;
        for frame in self.frames.iter_mut() {
            frame.tracks.retain(|t| *t != id);
        }
        Some(track)
    }

    pub fn clear_tracks(&mut self) {
        self.tracks.clear();
        for frame in self.frames.iter_mut() {
            frame.tracks.clear();
        }
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.tracks.clear();
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot {
            frames: self
                .frames
                .iter()
                .map(|f| SnapshotFrame {
                    frame_index: f.frame_index,
                    motion: f.motion,
                })
                .collect(),
            tracks: self.tracks.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    fn corr(id: u64, x: f64) -> Correspondence {
        Correspondence {
            track_id: TrackId(id),
            left_prev: Point2::new(x, 10.0),
            right_prev: Point2::new(x - 5.0, 10.0),
            left_curr: Point2::new(x + 1.0, 10.0),
            right_curr: Point2::new(x - 4.0, 10.0),
        }
    }

    #[test]
    fn test_bound_and_eviction_order() {
        let mut window: Window<()> = Window::new(3);
        for i in 0..5 {
            let evicted = window.push(i, (), SE3::identity(), &[]);
            assert!(window.len() <= 3);
            if i >= 3 {
                assert_eq!(evicted.map(|f| f.frame_index), Some(i - 3));
            } else {
                assert!(evicted.is_none());
            }
        }
        let indices: Vec<usize> = window.frames().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
    }

    #[test]
    fn test_capacity_at_least_two() {
        let window: Window<()> = Window::new(1);
        assert_eq!(window.capacity(), 2);
    }

    #[test]
    fn test_tracks_are_stitched_across_frames() {
        let mut window: Window<()> = Window::new(4);
        window.push(0, (), SE3::identity(), &[]);
        window.push(1, (), SE3::identity(), &[corr(7, 100.0)]);
        window.push(2, (), SE3::identity(), &[corr(7, 101.0)]);

        let track = window.track(TrackId(7)).unwrap();
        let frames: Vec<usize> = track.observations.keys().copied().collect();
        assert_eq!(frames, vec![0, 1, 2]);
        // The first sighting comes from the previous side of the link.
        assert_eq!(track.observations[&0].left, Point2::new(100.0, 10.0));
        assert_eq!(window.frame(0).unwrap().tracks, vec![TrackId(7)]);
    }

    #[test]
    fn test_eviction_drops_observations_and_empty_tracks() {
        let mut window: Window<()> = Window::new(2);
        window.push(0, (), SE3::identity(), &[]);
        window.push(1, (), SE3::identity(), &[corr(1, 50.0)]);
        window.push(2, (), SE3::identity(), &[corr(2, 80.0)]);

        // Frame 0 is gone; track 1 survives through frame 1 only.
        let t1 = window.track(TrackId(1)).unwrap();
        assert_eq!(t1.observations.keys().copied().collect::<Vec<_>>(), vec![1]);

        window.push(3, (), SE3::identity(), &[]);
        assert!(window.track(TrackId(1)).is_none());
        assert!(window.track(TrackId(2)).is_some());
        window.push(4, (), SE3::identity(), &[]);
        assert_eq!(window.num_tracks(), 0);
    }

    #[test]
    fn test_remove_and_clear_tracks() {
        let mut window: Window<()> = Window::new(4);
        window.push(0, (), SE3::identity(), &[]);
        window.push(1, (), SE3::identity(), &[corr(1, 50.0), corr(2, 60.0)]);
        assert!(window.remove_track(TrackId(1)).is_some());
        assert!(window.remove_track(TrackId(1)).is_none());
        assert_eq!(window.num_tracks(), 1);
        assert!(window.frames().all(|f| !f.tracks.contains(&TrackId(1))));

        window.clear_tracks();
        assert_eq!(window.num_tracks(), 0);
        assert_eq!(window.len(), 2);
    }

    #[test]
    fn test_snapshot_chains_motions() {
        let step = SE3::from_translation(Vector3::new(0.0, 0.0, 1.0));
        let mut window: Window<()> = Window::new(4);
        window.push(0, (), SE3::identity(), &[]);
        window.push(1, (), step, &[]);
        window.push(2, (), step, &[]);
        let snap = window.snapshot();
        let poses = snap.chained_poses();
        assert_eq!(poses.len(), 3);
        assert!((poses[2].translation.z - 2.0).abs() < 1e-12);
        assert_eq!(snap.slot_of(2), Some(2));
        assert_eq!(snap.slot_of(9), None);
    }
}
