//! The C function table the wrappers are built on.
//!
//! Every method mirrors one XGBoost C API call: it returns the raw status code (`0` on success)
//! and writes its results into out-parameters. Implementations copy any buffer owned by the
//! native library into Rust values before returning, so no native pointer outlives the call.
//! Status codes are translated by [`XGBError::check_return_value`](crate::XGBError), usually
//! through the `xgb_call!` macro.

use std::ffi::{c_void, CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::sync::Arc;

use snafu::ResultExt;

use crate::error::{InvalidString, XGBResult};

#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "native")]
pub mod xgboost;

pub(crate) const KEY_LABEL: &str = "label";
pub(crate) const KEY_WEIGHT: &str = "weight";
pub(crate) const KEY_BASE_MARGIN: &str = "base_margin";

/// Opaque handle value handed out by the native library.
///
/// Meaningless as data; only valid as an argument back into the same [`NativeLibrary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RawHandle(*mut c_void);

// Handles are plain tokens; thread affinity is the library's business and ownership is tracked
// by the wrappers.
unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub fn null() -> Self {
        RawHandle(std::ptr::null_mut())
    }

    pub fn from_ptr(ptr: *mut c_void) -> Self {
        RawHandle(ptr)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }
}

impl Default for RawHandle {
    fn default() -> Self {
        Self::null()
    }
}

pub(crate) fn to_cstring(s: &str) -> XGBResult<CString> {
    CString::new(s).context(InvalidString)
}

pub(crate) fn path_to_cstring(path: &Path) -> XGBResult<CString> {
    CString::new(path.as_os_str().as_bytes()).context(InvalidString)
}

/// Library shared by every wrapper created from it.
pub type SharedLibrary = Arc<dyn NativeLibrary>;

pub trait NativeLibrary: Send + Sync {
    /// Message of the most recent failure on the calling thread.
    fn last_error(&self) -> String;

    fn dmatrix_create_from_file(&self, fname: &CStr, silent: i32, out: &mut RawHandle) -> i32;

    /// `data` is row-major with `nrow * ncol` entries.
    fn dmatrix_create_from_mat(
        &self,
        data: &[f32],
        nrow: u64,
        ncol: u64,
        missing: f32,
        out: &mut RawHandle,
    ) -> i32;

    fn dmatrix_create_from_csr(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_col: usize,
        out: &mut RawHandle,
    ) -> i32;

    fn dmatrix_create_from_csc(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_row: usize,
        out: &mut RawHandle,
    ) -> i32;

    fn dmatrix_num_row(&self, handle: RawHandle, out: &mut u64) -> i32;

    fn dmatrix_num_col(&self, handle: RawHandle, out: &mut u64) -> i32;

    fn dmatrix_free(&self, handle: RawHandle) -> i32;

    fn dmatrix_get_float_info(&self, handle: RawHandle, field: &CStr, out: &mut Vec<f32>) -> i32;

    fn dmatrix_set_float_info(&self, handle: RawHandle, field: &CStr, array: &[f32]) -> i32;

    fn dmatrix_slice(&self, handle: RawHandle, idxset: &[i32], out: &mut RawHandle) -> i32;

    fn booster_create(&self, dmats: &[RawHandle], out: &mut RawHandle) -> i32;

    fn booster_free(&self, handle: RawHandle) -> i32;

    fn booster_set_param(&self, handle: RawHandle, name: &CStr, value: &CStr) -> i32;

    fn booster_update_one_iter(&self, handle: RawHandle, iter: i32, dtrain: RawHandle) -> i32;

    /// `grad` and `hess` always have the same length.
    fn booster_boost_one_iter(
        &self,
        handle: RawHandle,
        dtrain: RawHandle,
        grad: &[f32],
        hess: &[f32],
    ) -> i32;

    /// `dmats` and `evnames` always have the same length; `evnames[i]` names `dmats[i]`.
    fn booster_eval_one_iter(
        &self,
        handle: RawHandle,
        iter: i32,
        dmats: &[RawHandle],
        evnames: &[&CStr],
        out: &mut String,
    ) -> i32;

    fn booster_predict(
        &self,
        handle: RawHandle,
        dmat: RawHandle,
        option_mask: i32,
        ntree_limit: u32,
        out: &mut Vec<f32>,
    ) -> i32;

    fn booster_save_model(&self, handle: RawHandle, fname: &CStr) -> i32;

    fn booster_load_model(&self, handle: RawHandle, fname: &CStr) -> i32;

    /// One entry per tree. An empty `fmap` means no feature map.
    fn booster_dump_model(
        &self,
        handle: RawHandle,
        fmap: &CStr,
        with_stats: i32,
        out: &mut Vec<String>,
    ) -> i32;
}

/// The system libxgboost, reached through `xgboost-sys`.
#[cfg(feature = "native")]
pub fn xgboost() -> SharedLibrary {
    Arc::new(xgboost::XGBoostLibrary)
}
