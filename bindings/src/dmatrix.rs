use std::cell::Cell;
use std::fmt;
use std::marker::PhantomData;
use std::path::Path;

use log::{debug, info, warn};
use ndarray::Array2;
use snafu::{ensure, OptionExt};

use crate::error::{Released, Validation, XGBResult};
use crate::native::{
    path_to_cstring, to_cstring, RawHandle, SharedLibrary, KEY_BASE_MARGIN, KEY_LABEL, KEY_WEIGHT,
};

const KIND: &str = "DMatrix";

/// Value treated as missing by [`DMatrix::from_dense`] when no sentinel is given.
pub const DEFAULT_MISSING: f32 = 0.0;

/// Data matrix used throughout XGBoost for training/predicting [`Booster`](crate::Booster) models.
///
/// Holds the features of every instance (one row per instance) together with optional per-row
/// metadata: labels, weights and base margins.
///
/// Row and column counts are queried from the native library on every call; nothing is cached.
///
/// # Ownership
///
/// A `DMatrix` owns exactly one native handle. It is freed by [`release`](DMatrix::release) or,
/// failing that, when the value is dropped. A released matrix refuses every further operation with
/// [`XGBError::Released`](crate::XGBError::Released) instead of passing a dead handle to the
/// library.
///
/// The type is `Send` but not `Sync`: calls on one handle must not race.
///
/// # Examples
///
/// ```ignore
/// let data = &[1.0, 0.5, 0.2, 0.2,
///              0.7, 1.0, 0.1, 0.1,
///              0.2, 0.0, 0.0, 1.0];
/// let mut dmat = DMatrix::from_dense(lib, data, 3, 4, None)?;
/// assert_eq!(dmat.shape()?, (3, 4));
///
/// // set true labels for each row
/// dmat.set_labels(&[1.0, 0.0, 1.0])?;
/// ```
pub struct DMatrix {
    lib: SharedLibrary,
    handle: Option<RawHandle>,
    _not_sync: PhantomData<Cell<()>>,
}

impl DMatrix {
    fn from_handle(lib: SharedLibrary, handle: RawHandle) -> Self {
        DMatrix {
            lib,
            handle: Some(handle),
            _not_sync: PhantomData,
        }
    }

    /// Create a new `DMatrix` from a dense array in row-major order.
    ///
    /// `data` must hold exactly `num_rows * num_cols` values. Entries equal to `missing` (default
    /// [`DEFAULT_MISSING`]) are treated as absent.
    pub fn from_dense(
        lib: SharedLibrary,
        data: &[f32],
        num_rows: usize,
        num_cols: usize,
        missing: Option<f32>,
    ) -> XGBResult<Self> {
        ensure!(
            num_rows.checked_mul(num_cols) == Some(data.len()),
            Validation {
                reason: format!(
                    "dense buffer holds {} values, expected {num_rows} x {num_cols}",
                    data.len()
                ),
            }
        );

        let mut handle = RawHandle::null();
        xgb_call!(
            lib,
            dmatrix_create_from_mat(
                data,
                num_rows as u64,
                num_cols as u64,
                missing.unwrap_or(DEFAULT_MISSING),
                &mut handle,
            )
        )?;
        info!("Created DMatrix with shape: {}x{}", num_rows, num_cols);
        Ok(DMatrix::from_handle(lib, handle))
    }

    /// Create a new `DMatrix` from a two-dimensional array, one row per instance.
    pub fn from_array(lib: SharedLibrary, array: &Array2<f32>, missing: Option<f32>) -> XGBResult<Self> {
        let (num_rows, num_cols) = array.dim();
        let data: Vec<f32> = array.iter().copied().collect();
        DMatrix::from_dense(lib, &data, num_rows, num_cols, missing)
    }

    /// Create a new `DMatrix` from a sparse
    /// [CSR](https://en.wikipedia.org/wiki/Sparse_matrix#Compressed_sparse_row_(CSR,_CRS_or_Yale_format)) matrix.
    ///
    /// The column indices for row _i_ are stored in `indices[indptr[i]..indptr[i+1]]` and their
    /// values in `data[indptr[i]..indptr[i+1]]`.
    ///
    /// If `num_cols` is `None`, the number of columns is inferred from the data.
    pub fn from_csr(
        lib: SharedLibrary,
        indptr: &[usize],
        indices: &[usize],
        data: &[f32],
        num_cols: Option<usize>,
    ) -> XGBResult<Self> {
        let indices = check_compressed(indptr, indices, data)?;
        let mut handle = RawHandle::null();
        xgb_call!(
            lib,
            dmatrix_create_from_csr(indptr, &indices, data, num_cols.unwrap_or(0), &mut handle)
        )?;
        Ok(DMatrix::from_handle(lib, handle))
    }

    /// Create a new `DMatrix` from a sparse
    /// [CSC](https://en.wikipedia.org/wiki/Sparse_matrix#Compressed_sparse_column_(CSC_or_CCS)) matrix.
    ///
    /// If `num_rows` is `None`, the number of rows is inferred from the data.
    pub fn from_csc(
        lib: SharedLibrary,
        indptr: &[usize],
        indices: &[usize],
        data: &[f32],
        num_rows: Option<usize>,
    ) -> XGBResult<Self> {
        let indices = check_compressed(indptr, indices, data)?;
        let mut handle = RawHandle::null();
        xgb_call!(
            lib,
            dmatrix_create_from_csc(indptr, &indices, data, num_rows.unwrap_or(0), &mut handle)
        )?;
        Ok(DMatrix::from_handle(lib, handle))
    }

    /// Create a new `DMatrix` from given file.
    ///
    /// Supports text files in [LIBSVM](https://www.csie.ntu.edu.tw/~cjlin/libsvm/) format and
    /// binary buffers written by XGBoost. The library is asked to load quietly.
    ///
    /// # LIBSVM format
    ///
    /// ```text
    /// <label> <index>:<value> [<index>:<value> ...]
    /// ```
    pub fn load<P: AsRef<Path>>(lib: SharedLibrary, path: P) -> XGBResult<Self> {
        let path = path.as_ref();
        ensure!(
            !path.as_os_str().is_empty(),
            Validation {
                reason: "DMatrix path must not be empty",
            }
        );
        debug!("Loading DMatrix from: {}", path.display());

        let fname = path_to_cstring(path)?;
        let silent = 1;
        let mut handle = RawHandle::null();
        xgb_call!(lib, dmatrix_create_from_file(&fname, silent, &mut handle))?;
        Ok(DMatrix::from_handle(lib, handle))
    }

    /// Handle for composing native calls inside this crate.
    pub(crate) fn handle(&self) -> XGBResult<RawHandle> {
        self.handle.context(Released { kind: KIND })
    }

    /// Library this matrix was created through.
    pub(crate) fn library(&self) -> SharedLibrary {
        self.lib.clone()
    }

    /// Get the number of rows in this matrix.
    pub fn num_rows(&self) -> XGBResult<usize> {
        let handle = self.handle()?;
        let mut out = 0;
        xgb_call!(self.lib, dmatrix_num_row(handle, &mut out))?;
        Ok(out as usize)
    }

    /// Get the number of columns in this matrix.
    pub fn num_cols(&self) -> XGBResult<usize> {
        let handle = self.handle()?;
        let mut out = 0;
        xgb_call!(self.lib, dmatrix_num_col(handle, &mut out))?;
        Ok(out as usize)
    }

    /// Get the shape (rows x columns) of this matrix.
    pub fn shape(&self) -> XGBResult<(usize, usize)> {
        Ok((self.num_rows()?, self.num_cols()?))
    }

    /// Get a new `DMatrix` containing only the given rows, in the given order.
    ///
    /// The result owns its own handle and outlives `self` if needed.
    pub fn slice(&self, indices: &[usize]) -> XGBResult<DMatrix> {
        let handle = self.handle()?;
        debug!("Slicing {} rows from DMatrix", indices.len());

        let idxset = indices
            .iter()
            .map(|&i| {
                i32::try_from(i).ok().context(Validation {
                    reason: format!("row index {i} does not fit the native index type"),
                })
            })
            .collect::<XGBResult<Vec<i32>>>()?;

        let mut out = RawHandle::null();
        xgb_call!(self.lib, dmatrix_slice(handle, &idxset, &mut out))?;
        Ok(DMatrix::from_handle(self.lib.clone(), out))
    }

    /// Get ground truth labels for each row of this matrix.
    pub fn labels(&self) -> XGBResult<Vec<f32>> {
        self.get_float_info(KEY_LABEL)
    }

    /// Set ground truth labels, one per row.
    pub fn set_labels(&mut self, labels: &[f32]) -> XGBResult<()> {
        self.check_per_row(KEY_LABEL, labels)?;
        self.set_float_info(KEY_LABEL, labels)
    }

    /// Get weights of each instance.
    pub fn weights(&self) -> XGBResult<Vec<f32>> {
        self.get_float_info(KEY_WEIGHT)
    }

    /// Set weights of each instance, one per row.
    pub fn set_weights(&mut self, weights: &[f32]) -> XGBResult<()> {
        self.check_per_row(KEY_WEIGHT, weights)?;
        self.set_float_info(KEY_WEIGHT, weights)
    }

    /// Get base margin.
    pub fn base_margin(&self) -> XGBResult<Vec<f32>> {
        self.get_float_info(KEY_BASE_MARGIN)
    }

    /// Set base margin.
    ///
    /// If specified, XGBoost will start from this margin, can be used to specify initial prediction
    /// to boost from. Holds one value per row and output group; an empty slice clears it.
    pub fn set_base_margin(&mut self, base_margin: &[f32]) -> XGBResult<()> {
        let num_rows = self.num_rows()?;
        ensure!(
            base_margin.is_empty() || (num_rows > 0 && base_margin.len() % num_rows == 0),
            Validation {
                reason: format!(
                    "base_margin holds {} values, not a multiple of {num_rows} rows",
                    base_margin.len()
                ),
            }
        );
        self.set_float_info(KEY_BASE_MARGIN, base_margin)
    }

    fn check_per_row(&self, field: &str, array: &[f32]) -> XGBResult<()> {
        let num_rows = self.num_rows()?;
        ensure!(
            array.len() == num_rows,
            Validation {
                reason: format!(
                    "{field} holds {} values but the matrix has {num_rows} rows",
                    array.len()
                ),
            }
        );
        Ok(())
    }

    fn get_float_info(&self, field: &str) -> XGBResult<Vec<f32>> {
        let handle = self.handle()?;
        let field = to_cstring(field)?;
        let mut out = Vec::new();
        xgb_call!(self.lib, dmatrix_get_float_info(handle, &field, &mut out))?;
        Ok(out)
    }

    fn set_float_info(&mut self, field: &str, array: &[f32]) -> XGBResult<()> {
        let handle = self.handle()?;
        let field = to_cstring(field)?;
        xgb_call!(self.lib, dmatrix_set_float_info(handle, &field, array))
    }

    /// Free the native matrix now.
    ///
    /// Calling this again, or dropping the value afterwards, does nothing. If the library reports a
    /// failure the handle is still considered gone.
    pub fn release(&mut self) -> XGBResult<()> {
        if let Some(handle) = self.handle.take() {
            debug!("Freeing DMatrix handle {:?}", handle);
            xgb_call!(self.lib, dmatrix_free(handle))?;
        }
        Ok(())
    }

    pub fn is_released(&self) -> bool {
        self.handle.is_none()
    }
}

/// Shared checks for both compressed layouts; returns the indices narrowed for the C API.
fn check_compressed(indptr: &[usize], indices: &[usize], data: &[f32]) -> XGBResult<Vec<u32>> {
    ensure!(
        indices.len() == data.len(),
        Validation {
            reason: format!(
                "{} indices given for {} values",
                indices.len(),
                data.len()
            ),
        }
    );
    ensure!(
        !indptr.is_empty() && indptr.windows(2).all(|w| w[0] <= w[1]),
        Validation {
            reason: "indptr must be non-empty and non-decreasing",
        }
    );
    ensure!(
        indptr[indptr.len() - 1] == data.len(),
        Validation {
            reason: format!(
                "indptr ends at {} but {} values were given",
                indptr[indptr.len() - 1],
                data.len()
            ),
        }
    );

    indices
        .iter()
        .map(|&i| {
            u32::try_from(i).ok().context(Validation {
                reason: format!("index {i} does not fit the native index type"),
            })
        })
        .collect()
}

impl fmt::Debug for DMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DMatrix").field("handle", &self.handle).finish()
    }
}

impl Drop for DMatrix {
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }
        if cfg!(debug_assertions) {
            warn!("DMatrix dropped without release, freeing it now");
        }
        if let Err(err) = self.release() {
            warn!("Failed to free DMatrix: {}", err);
        }
    }
}
