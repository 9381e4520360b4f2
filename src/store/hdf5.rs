//! HDF5 reader in SWMR mode.
//!
//! The file is opened read-only with `H5F_ACC_SWMR_READ` and a file-access property
//! list requesting the latest library format, which is what an SWMR writer produces.
//! The dataset has rank 3 with shape `[width, height, frames]`; frames are appended
//! along the last axis.
//!
//! Each call opens a short-lived dataset handle and closes it before returning, so
//! the open-object count is back to one file after every call. All identifiers are
//! held in [`Hid`] guards and released on every exit path.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{FrameSource, ObjectCounts};
use crate::error::{MonitorError, MonitorResult};
use crate::image::{Dimensions, Image};

/// Rank of the dataset: two frame axes plus the growth axis.
pub const DATASET_RANK: usize = 3;

/// Name of the dataset inside the file written by the companion writer.
pub const DEFAULT_DATASET: &str = "data";

#[cfg(feature = "storage_hdf5")]
use {
    crate::error::ConsistencyError,
    hdf5_sys::h5::{herr_t, hsize_t, H5open},
    hdf5_sys::h5d::{H5Dclose, H5Dget_space, H5Dopen2, H5Dread, H5Drefresh},
    hdf5_sys::h5f::{
        H5Fclose, H5Fget_obj_count, H5Fopen, H5F_ACC_RDONLY, H5F_ACC_SWMR_READ,
        H5F_LIBVER_LATEST, H5F_OBJ_ALL, H5F_OBJ_ATTR, H5F_OBJ_DATASET, H5F_OBJ_DATATYPE,
        H5F_OBJ_FILE, H5F_OBJ_GROUP,
    },
    hdf5_sys::h5i::hid_t,
    hdf5_sys::h5p::{H5Pclose, H5Pcreate, H5Pset_libver_bounds, H5P_FILE_ACCESS, H5P_DEFAULT},
    hdf5_sys::h5s::{
        H5S_seloper_t, H5Sclose, H5Screate_simple, H5Sget_simple_extent_dims,
        H5Sget_simple_extent_ndims, H5Sselect_hyperslab,
    },
    hdf5_sys::h5t::H5T_NATIVE_UINT32,
    std::ffi::CString,
};

/// Owned HDF5 identifier, closed on drop.
#[cfg(feature = "storage_hdf5")]
struct Hid {
    id: hid_t,
    close: unsafe extern "C" fn(hid_t) -> herr_t,
}

#[cfg(feature = "storage_hdf5")]
impl Hid {
    /// Wrap `id`, turning a negative identifier into an error built by `err`.
    fn new(
        id: hid_t,
        close: unsafe extern "C" fn(hid_t) -> herr_t,
        err: impl FnOnce() -> MonitorError,
    ) -> MonitorResult<Self> {
        if id < 0 {
            Err(err())
        } else {
            Ok(Self { id, close })
        }
    }

    /// Close now and report failure instead of ignoring it in `Drop`.
    fn close(self) -> Result<(), herr_t> {
        let id = self.id;
        let close = self.close;
        std::mem::forget(self);
        // SAFETY: `id` is a valid identifier owned by this guard and closed exactly once.
        let status = unsafe { close(id) };
        if status < 0 {
            Err(status)
        } else {
            Ok(())
        }
    }
}

#[cfg(feature = "storage_hdf5")]
impl Drop for Hid {
    fn drop(&mut self) {
        // SAFETY: `id` is a valid identifier owned by this guard and closed exactly once.
        let status = unsafe { (self.close)(self.id) };
        if status < 0 {
            tracing::warn!(id = self.id, status, "Failed to release HDF5 identifier");
        }
    }
}

/// Reader for an HDF5 file being appended to by an SWMR writer.
pub struct Hdf5Source {
    path: PathBuf,
    dataset: String,
    #[cfg(feature = "storage_hdf5")]
    file: Option<Hid>,
    #[cfg(feature = "storage_hdf5")]
    dataset_c: CString,
    #[cfg(feature = "storage_hdf5")]
    extent: Option<[u64; DATASET_RANK]>,
}

impl std::fmt::Debug for Hdf5Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hdf5Source")
            .field("path", &self.path)
            .field("dataset", &self.dataset)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(not(feature = "storage_hdf5"))]
impl Hdf5Source {
    /// HDF5 support was compiled out.
    pub fn open(_path: &Path, _dataset: &str) -> MonitorResult<Self> {
        Err(MonitorError::FeatureNotEnabled("storage_hdf5".to_string()))
    }
}

#[cfg(feature = "storage_hdf5")]
impl Hdf5Source {
    /// Open `path` for SWMR reading and remember which dataset to watch.
    ///
    /// The dataset itself is opened per call, not here, so a writer that creates it
    /// shortly after the file is still picked up.
    pub fn open(path: &Path, dataset: &str) -> MonitorResult<Self> {
        if !path.exists() {
            return Err(MonitorError::open(path, "file does not exist"));
        }
        let path_c = path
            .to_str()
            .and_then(|p| CString::new(p).ok())
            .ok_or_else(|| MonitorError::open(path, "path is not valid UTF-8 without NUL bytes"))?;
        let dataset_c = CString::new(dataset)
            .map_err(|_| MonitorError::open(path, "dataset name contains a NUL byte"))?;

        // SAFETY: plain FFI calls; every identifier is wrapped in a guard right away.
        let file = unsafe {
            if H5open() < 0 {
                return Err(MonitorError::open(path, "HDF5 library failed to initialize"));
            }
            let fapl = Hid::new(H5Pcreate(*H5P_FILE_ACCESS), H5Pclose, || {
                MonitorError::open(path, "could not create file access property list")
            })?;
            if H5Pset_libver_bounds(fapl.id, H5F_LIBVER_LATEST, H5F_LIBVER_LATEST) < 0 {
                return Err(MonitorError::open(path, "could not request latest file format"));
            }
            Hid::new(
                H5Fopen(path_c.as_ptr(), H5F_ACC_RDONLY | H5F_ACC_SWMR_READ, fapl.id),
                H5Fclose,
                || MonitorError::open(path, "not an HDF5 file or SWMR read not supported"),
            )?
        };

        tracing::debug!(path = %path.display(), dataset, "Opened HDF5 file for SWMR read");
        Ok(Self {
            path: path.to_path_buf(),
            dataset: dataset.to_string(),
            file: Some(file),
            dataset_c,
            extent: None,
        })
    }

    fn file_id(&self) -> MonitorResult<hid_t> {
        self.file.as_ref().map(|f| f.id).ok_or(MonitorError::Closed)
    }

    fn open_dataset(&self, err: impl FnOnce(String) -> MonitorError) -> MonitorResult<Hid> {
        let fid = self.file_id()?;
        // SAFETY: `fid` is an open file and `dataset_c` is NUL-terminated.
        let id = unsafe { H5Dopen2(fid, self.dataset_c.as_ptr(), H5P_DEFAULT) };
        Hid::new(id, H5Dclose, || {
            err(format!("could not open dataset '{}'", self.dataset))
        })
    }

    fn obj_count(&self, kind: std::os::raw::c_uint) -> u64 {
        match &self.file {
            // SAFETY: the file identifier is open.
            Some(file) => u64::try_from(unsafe { H5Fget_obj_count(file.id, kind) }).unwrap_or(0),
            None => 0,
        }
    }

    fn log_open_objects(&self) {
        if let Some(counts) = self.open_object_counts() {
            tracing::trace!(
                datasets = counts.datasets,
                groups = counts.groups,
                attributes = counts.attributes,
                datatypes = counts.datatypes,
                files = counts.files,
                all = counts.all,
                "Open HDF5 objects"
            );
        }
    }
}

#[cfg(feature = "storage_hdf5")]
#[async_trait]
impl FrameSource for Hdf5Source {
    fn describe(&self) -> String {
        format!("{}:/{}", self.path.display(), self.dataset)
    }

    async fn latest_frame_count(&mut self, expected: Dimensions) -> MonitorResult<u64> {
        let path = self.path.clone();
        let dset = self.open_dataset(|reason| MonitorError::refresh(&path, reason))?;

        // Refresh before taking the dataspace so the extent includes recent commits.
        // SAFETY: `dset` is an open dataset.
        if unsafe { H5Drefresh(dset.id) } < 0 {
            return Err(MonitorError::refresh(&self.path, "H5Drefresh failed"));
        }
        // SAFETY: `dset` is an open dataset.
        let space = Hid::new(unsafe { H5Dget_space(dset.id) }, H5Sclose, || {
            MonitorError::refresh(&path, "could not get dataspace")
        })?;

        // SAFETY: `space` is an open dataspace.
        let ndims = unsafe { H5Sget_simple_extent_ndims(space.id) };
        if usize::try_from(ndims).ok() != Some(DATASET_RANK) {
            return Err(ConsistencyError::RankMismatch {
                expected: DATASET_RANK,
                actual: usize::try_from(ndims).unwrap_or(0),
            }
            .into());
        }

        let mut dims: [hsize_t; DATASET_RANK] = [0; DATASET_RANK];
        let mut maxdims: [hsize_t; DATASET_RANK] = [0; DATASET_RANK];
        // SAFETY: both buffers hold `ndims` elements.
        unsafe { H5Sget_simple_extent_dims(space.id, dims.as_mut_ptr(), maxdims.as_mut_ptr()) };
        tracing::debug!(dims = ?dims, "Got dimensions");

        let actual = Dimensions::new(extent_to_usize(dims[0])?, extent_to_usize(dims[1])?);
        if actual != expected {
            return Err(ConsistencyError::ShapeMismatch { expected, actual }.into());
        }
        self.extent = Some([dims[0], dims[1], dims[2]]);

        drop(space);
        drop(dset);
        Ok(dims[2])
    }

    async fn read_frame(&mut self, index: u64, into: &mut Image) -> MonitorResult<()> {
        let extent = self.extent.unwrap_or([0; DATASET_RANK]);
        if index >= extent[2] {
            return Err(ConsistencyError::MissingFrame {
                index,
                available: extent[2],
            }
            .into());
        }
        let frame_dims = into.dims();
        let dset = self.open_dataset(|reason| MonitorError::read(index, reason))?;

        // SAFETY: `dset` is an open dataset.
        let filespace = Hid::new(unsafe { H5Dget_space(dset.id) }, H5Sclose, || {
            MonitorError::read(index, "could not get dataspace")
        })?;
        let offset: [hsize_t; DATASET_RANK] = [0, 0, index];
        let count: [hsize_t; DATASET_RANK] = [frame_dims.width as hsize_t, frame_dims.height as hsize_t, 1];
        // SAFETY: `offset` and `count` hold one entry per dataset dimension.
        let status = unsafe {
            H5Sselect_hyperslab(
                filespace.id,
                H5S_seloper_t::H5S_SELECT_SET,
                offset.as_ptr(),
                std::ptr::null(),
                count.as_ptr(),
                std::ptr::null(),
            )
        };
        if status < 0 {
            return Err(MonitorError::read(index, "hyperslab selection failed"));
        }

        let mem_dims: [hsize_t; 2] = [count[0], count[1]];
        // SAFETY: `mem_dims` holds two entries, matching the rank argument.
        let memspace = Hid::new(
            unsafe { H5Screate_simple(2, mem_dims.as_ptr(), std::ptr::null()) },
            H5Sclose,
            || MonitorError::read(index, "could not create memory dataspace"),
        )?;

        tracing::debug!(index, "Reading dataset");
        let buffer = into.samples_mut();
        // SAFETY: `buffer` holds width * height u32 values, exactly the selected elements.
        let status = unsafe {
            H5Dread(
                dset.id,
                *H5T_NATIVE_UINT32,
                memspace.id,
                filespace.id,
                H5P_DEFAULT,
                buffer.as_mut_ptr().cast(),
            )
        };
        if status < 0 {
            return Err(MonitorError::read(index, "H5Dread failed"));
        }

        drop(memspace);
        drop(filespace);
        drop(dset);
        self.log_open_objects();
        Ok(())
    }

    async fn close(&mut self) -> MonitorResult<()> {
        if let Some(file) = self.file.take() {
            self.extent = None;
            file.close().map_err(|status| {
                MonitorError::open(&self.path, format!("H5Fclose returned {status}"))
            })?;
            tracing::debug!(path = %self.path.display(), "Closed HDF5 file");
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    fn open_object_counts(&self) -> Option<ObjectCounts> {
        self.file.as_ref()?;
        Some(ObjectCounts {
            datasets: self.obj_count(H5F_OBJ_DATASET),
            groups: self.obj_count(H5F_OBJ_GROUP),
            attributes: self.obj_count(H5F_OBJ_ATTR),
            datatypes: self.obj_count(H5F_OBJ_DATATYPE),
            files: self.obj_count(H5F_OBJ_FILE),
            all: self.obj_count(H5F_OBJ_ALL),
        })
    }
}

#[cfg(not(feature = "storage_hdf5"))]
#[async_trait]
impl FrameSource for Hdf5Source {
    fn describe(&self) -> String {
        format!("{}:/{}", self.path.display(), self.dataset)
    }

    async fn latest_frame_count(&mut self, _expected: Dimensions) -> MonitorResult<u64> {
        Err(MonitorError::FeatureNotEnabled("storage_hdf5".to_string()))
    }

    async fn read_frame(&mut self, _index: u64, _into: &mut Image) -> MonitorResult<()> {
        Err(MonitorError::FeatureNotEnabled("storage_hdf5".to_string()))
    }

    async fn close(&mut self) -> MonitorResult<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        true
    }
}

/// Convert a dataset dimension to an in-memory length.
#[cfg_attr(not(feature = "storage_hdf5"), allow(dead_code))]
fn extent_to_usize(extent: u64) -> MonitorResult<usize> {
    usize::try_from(extent)
        .map_err(|_| crate::error::ConsistencyError::ExtentTooLarge { extent }.into())
}
