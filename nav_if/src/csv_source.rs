//! # CSV Sources
//!
//! File backed implementations of the collaborator traits:
//!
//! - Frames are read from a directory holding one CSV per frame with `x,y,z[,intensity]`
//!   columns. Files are sorted by name and grouped into input files by the part of the name
//!   before the last `_`, so `drive1_0000.csv, drive1_0001.csv, drive2_0000.csv` is two input
//!   files.
//! - Ground truth is a single CSV with `x,y,altitude,heading,roll,pitch,age` columns, one row
//!   per frame.
//! - A reference cloud is a single CSV of points.
//!
//! Any of these may have a `<file>.meta.json` sidecar holding `{"offset": [x, y, z]}`, the
//! offset of the local frame from the global one.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use nalgebra::{Point3, Vector3};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{source::SourceError, Frame, FrameSource, GroundTruth, PointCloud, Pose};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Frame source reading one CSV per frame from a directory.
pub struct CsvFrameSource {
    files: Vec<FrameFile>,

    /// Position of the next file to read in `files`
    cursor: usize,

    /// Only every `stride`th frame is decoded
    stride: usize,

    current: Option<usize>,
    current_is_first: bool,
    last_group: Option<String>,
}

/// Ground truth read from a single CSV file.
pub struct CsvGroundTruth {
    poses: Vec<Pose>,
    offset: Option<Vector3<f64>>,
}

/// A reference map loaded from disk.
pub struct ReferenceCloud {
    pub cloud: PointCloud,
    pub offset: Option<Vector3<f64>>,
}

struct FrameFile {
    path: PathBuf,
    group: String,
}

#[derive(Serialize, Deserialize)]
struct PointRow {
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    intensity: Option<f32>,
}

#[derive(Serialize, Deserialize)]
struct Meta {
    offset: [f64; 3],
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CsvFrameSource {
    /// Index all frame files in the given directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, SourceError> {
        let dir = dir.as_ref();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| SourceError::Io(dir.to_path_buf(), e))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().map(|e| e == "csv").unwrap_or(false))
            .collect();

        if paths.is_empty() {
            return Err(SourceError::NoFrames(dir.to_path_buf()));
        }

        paths.sort();

        let files: Vec<FrameFile> = paths
            .into_iter()
            .map(|path| {
                let group = group_name(&path);
                FrameFile { path, group }
            })
            .collect();

        debug!("Indexed {} frame files in {:?}", files.len(), dir);

        Ok(Self {
            files,
            cursor: 0,
            stride: 1,
            current: None,
            current_is_first: false,
            last_group: None,
        })
    }

    /// Only decode every `stride`th frame, other frames are skipped without being read.
    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride.max(1);
        self
    }

    pub fn num_frames(&self) -> usize {
        self.files.len()
    }
}

impl FrameSource for CsvFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        while self.cursor < self.files.len() && self.cursor % self.stride != 0 {
            self.cursor += 1;
        }

        let index = self.cursor;
        let file = match self.files.get(index) {
            Some(f) => f,
            None => return Ok(None),
        };
        self.cursor += 1;

        let cloud = read_cloud(&file.path)?;

        self.current_is_first = self.last_group.as_deref() != Some(file.group.as_str());
        self.last_group = Some(file.group.clone());
        self.current = Some(index);

        Ok(Some(Frame { index, cloud }))
    }

    fn current_frame_index(&self) -> Option<usize> {
        self.current
    }

    fn is_first_frame_of_source_file(&self) -> bool {
        self.current_is_first
    }

    fn current_source_name(&self) -> Option<String> {
        self.last_group.clone()
    }
}

impl CsvGroundTruth {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();

        let mut reader =
            csv::Reader::from_path(path).map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;

        let mut poses = Vec::new();
        for (i, row) in reader.deserialize::<Pose>().enumerate() {
            let pose = row.map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;
            poses.push(pose.with_frame_index(i));
        }

        let offset = load_offset(path)?;

        debug!("Loaded {} ground truth poses from {:?}", poses.len(), path);

        Ok(Self { poses, offset })
    }

    pub fn with_offset(mut self, offset: Vector3<f64>) -> Self {
        self.offset = Some(offset);
        self
    }
}

impl GroundTruth for CsvGroundTruth {
    fn coordinates_for_all_frames(&self) -> Result<Vec<Pose>, SourceError> {
        Ok(self.poses.clone())
    }

    fn offset(&self) -> Option<Vector3<f64>> {
        self.offset
    }
}

impl ReferenceCloud {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let cloud = read_cloud(path)?;
        let offset = load_offset(path)?;

        debug!("Loaded reference cloud of {} points from {:?}", cloud.len(), path);

        Ok(Self { cloud, offset })
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Read a point cloud from a CSV file with `x,y,z[,intensity]` columns.
///
/// Intensities are kept only if every row has one.
pub fn read_cloud<P: AsRef<Path>>(path: P) -> Result<PointCloud, SourceError> {
    let path = path.as_ref();

    let mut reader =
        csv::Reader::from_path(path).map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;

    let mut points = Vec::new();
    let mut intensities = Vec::new();
    let mut all_intensity = true;

    for row in reader.deserialize::<PointRow>() {
        let row = row.map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;
        points.push(Point3::new(row.x, row.y, row.z));
        match row.intensity {
            Some(i) => intensities.push(i),
            None => all_intensity = false,
        }
    }

    if all_intensity && !points.is_empty() {
        PointCloud::with_intensities(points, intensities)
            .map_err(|e| SourceError::InvalidData(path.to_path_buf(), e.to_string()))
    } else {
        Ok(PointCloud::new(points))
    }
}

/// Write a point cloud to a CSV file readable by [`read_cloud`].
///
/// The intensity column is left empty for clouds without intensities.
pub fn write_cloud<P: AsRef<Path>>(path: P, cloud: &PointCloud) -> Result<(), SourceError> {
    let path = path.as_ref();

    let mut writer =
        csv::Writer::from_path(path).map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;

    for (i, p) in cloud.points.iter().enumerate() {
        writer
            .serialize(PointRow {
                x: p.x,
                y: p.y,
                z: p.z,
                intensity: cloud.intensity(i),
            })
            .map_err(|e| SourceError::Csv(path.to_path_buf(), e))?;
    }

    writer
        .flush()
        .map_err(|e| SourceError::Io(path.to_path_buf(), e))
}

/// Save an offset to the `.meta.json` sidecar of `path`.
pub fn save_offset<P: AsRef<Path>>(path: P, offset: &Vector3<f64>) -> Result<(), SourceError> {
    let meta_path = meta_path(path.as_ref());
    let meta = Meta {
        offset: [offset.x, offset.y, offset.z],
    };

    let meta_str =
        serde_json::to_string(&meta).map_err(|e| SourceError::Meta(meta_path.clone(), e))?;
    std::fs::write(&meta_path, meta_str).map_err(|e| SourceError::Io(meta_path, e))
}

/// Load the offset from the `.meta.json` sidecar of `path`, if there is one.
pub fn load_offset<P: AsRef<Path>>(path: P) -> Result<Option<Vector3<f64>>, SourceError> {
    let meta_path = meta_path(path.as_ref());

    if !meta_path.exists() {
        return Ok(None);
    }

    let meta_str =
        std::fs::read_to_string(&meta_path).map_err(|e| SourceError::Io(meta_path.clone(), e))?;
    let meta: Meta =
        serde_json::from_str(&meta_str).map_err(|e| SourceError::Meta(meta_path.clone(), e))?;

    Ok(Some(Vector3::from(meta.offset)))
}

fn meta_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".meta.json");
    PathBuf::from(name)
}

/// Input file a frame belongs to: the file stem up to the last `_`.
fn group_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    match stem.rfind('_') {
        Some(i) => stem[..i].to_string(),
        None => stem,
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
