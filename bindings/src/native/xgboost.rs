use std::ffi::CStr;
use std::{ptr, slice};

use log::debug;

use super::{NativeLibrary, RawHandle};

/// [`NativeLibrary`] backed by the system libxgboost.
pub struct XGBoostLibrary;

fn copy_floats(data: *const f32, len: xgboost_sys::bst_ulong) -> Vec<f32> {
    if data.is_null() || len == 0 {
        return Vec::new();
    }
    unsafe { slice::from_raw_parts(data, len as usize).to_vec() }
}

fn copy_string(s: *const libc::c_char) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(s).to_string_lossy().into_owned() }
}

impl NativeLibrary for XGBoostLibrary {
    fn last_error(&self) -> String {
        copy_string(unsafe { xgboost_sys::XGBGetLastError() })
    }

    fn dmatrix_create_from_file(&self, fname: &CStr, silent: i32, out: &mut RawHandle) -> i32 {
        let mut handle = ptr::null_mut();
        let ret =
            unsafe { xgboost_sys::XGDMatrixCreateFromFile(fname.as_ptr(), silent, &mut handle) };
        *out = RawHandle::from_ptr(handle);
        ret
    }

    fn dmatrix_create_from_mat(
        &self,
        data: &[f32],
        nrow: u64,
        ncol: u64,
        missing: f32,
        out: &mut RawHandle,
    ) -> i32 {
        let mut handle = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGDMatrixCreateFromMat(data.as_ptr(), nrow, ncol, missing, &mut handle)
        };
        *out = RawHandle::from_ptr(handle);
        ret
    }

    fn dmatrix_create_from_csr(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_col: usize,
        out: &mut RawHandle,
    ) -> i32 {
        let mut handle = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGDMatrixCreateFromCSREx(
                indptr.as_ptr(),
                indices.as_ptr(),
                data.as_ptr(),
                indptr.len(),
                data.len(),
                num_col,
                &mut handle,
            )
        };
        *out = RawHandle::from_ptr(handle);
        ret
    }

    fn dmatrix_create_from_csc(
        &self,
        indptr: &[usize],
        indices: &[u32],
        data: &[f32],
        num_row: usize,
        out: &mut RawHandle,
    ) -> i32 {
        let mut handle = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGDMatrixCreateFromCSCEx(
                indptr.as_ptr(),
                indices.as_ptr(),
                data.as_ptr(),
                indptr.len(),
                data.len(),
                num_row,
                &mut handle,
            )
        };
        *out = RawHandle::from_ptr(handle);
        ret
    }

    fn dmatrix_num_row(&self, handle: RawHandle, out: &mut u64) -> i32 {
        unsafe { xgboost_sys::XGDMatrixNumRow(handle.as_ptr(), out) }
    }

    fn dmatrix_num_col(&self, handle: RawHandle, out: &mut u64) -> i32 {
        unsafe { xgboost_sys::XGDMatrixNumCol(handle.as_ptr(), out) }
    }

    fn dmatrix_free(&self, handle: RawHandle) -> i32 {
        unsafe { xgboost_sys::XGDMatrixFree(handle.as_ptr()) }
    }

    fn dmatrix_get_float_info(&self, handle: RawHandle, field: &CStr, out: &mut Vec<f32>) -> i32 {
        let mut out_len = 0;
        let mut out_dptr = ptr::null();
        let ret = unsafe {
            xgboost_sys::XGDMatrixGetFloatInfo(
                handle.as_ptr(),
                field.as_ptr(),
                &mut out_len,
                &mut out_dptr,
            )
        };
        if ret == 0 {
            *out = copy_floats(out_dptr, out_len);
        }
        ret
    }

    fn dmatrix_set_float_info(&self, handle: RawHandle, field: &CStr, array: &[f32]) -> i32 {
        unsafe {
            xgboost_sys::XGDMatrixSetFloatInfo(
                handle.as_ptr(),
                field.as_ptr(),
                array.as_ptr(),
                array.len() as u64,
            )
        }
    }

    fn dmatrix_slice(&self, handle: RawHandle, idxset: &[i32], out: &mut RawHandle) -> i32 {
        let mut sliced = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGDMatrixSliceDMatrix(
                handle.as_ptr(),
                idxset.as_ptr(),
                idxset.len() as u64,
                &mut sliced,
            )
        };
        *out = RawHandle::from_ptr(sliced);
        ret
    }

    fn booster_create(&self, dmats: &[RawHandle], out: &mut RawHandle) -> i32 {
        let handles: Vec<xgboost_sys::DMatrixHandle> = dmats.iter().map(|h| h.as_ptr()).collect();
        let mut handle = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGBoosterCreate(handles.as_ptr(), handles.len() as u64, &mut handle)
        };
        *out = RawHandle::from_ptr(handle);
        ret
    }

    fn booster_free(&self, handle: RawHandle) -> i32 {
        unsafe { xgboost_sys::XGBoosterFree(handle.as_ptr()) }
    }

    fn booster_set_param(&self, handle: RawHandle, name: &CStr, value: &CStr) -> i32 {
        unsafe { xgboost_sys::XGBoosterSetParam(handle.as_ptr(), name.as_ptr(), value.as_ptr()) }
    }

    fn booster_update_one_iter(&self, handle: RawHandle, iter: i32, dtrain: RawHandle) -> i32 {
        unsafe { xgboost_sys::XGBoosterUpdateOneIter(handle.as_ptr(), iter, dtrain.as_ptr()) }
    }

    fn booster_boost_one_iter(
        &self,
        handle: RawHandle,
        dtrain: RawHandle,
        grad: &[f32],
        hess: &[f32],
    ) -> i32 {
        // the C API takes mutable pointers even though it only reads them
        let mut grad_vec = grad.to_vec();
        let mut hess_vec = hess.to_vec();
        unsafe {
            xgboost_sys::XGBoosterBoostOneIter(
                handle.as_ptr(),
                dtrain.as_ptr(),
                grad_vec.as_mut_ptr(),
                hess_vec.as_mut_ptr(),
                grad_vec.len() as u64,
            )
        }
    }

    fn booster_eval_one_iter(
        &self,
        handle: RawHandle,
        iter: i32,
        dmats: &[RawHandle],
        evnames: &[&CStr],
        out: &mut String,
    ) -> i32 {
        let mut handles: Vec<xgboost_sys::DMatrixHandle> =
            dmats.iter().map(|h| h.as_ptr()).collect();
        let mut evptrs: Vec<*const libc::c_char> = evnames.iter().map(|n| n.as_ptr()).collect();

        let mut out_result = ptr::null();
        let ret = unsafe {
            xgboost_sys::XGBoosterEvalOneIter(
                handle.as_ptr(),
                iter,
                handles.as_mut_ptr(),
                evptrs.as_mut_ptr(),
                handles.len() as u64,
                &mut out_result,
            )
        };
        if ret == 0 {
            *out = copy_string(out_result);
        }
        ret
    }

    fn booster_predict(
        &self,
        handle: RawHandle,
        dmat: RawHandle,
        option_mask: i32,
        ntree_limit: u32,
        out: &mut Vec<f32>,
    ) -> i32 {
        let mut out_len = 0;
        let mut out_result = ptr::null();
        let ret = unsafe {
            xgboost_sys::XGBoosterPredict(
                handle.as_ptr(),
                dmat.as_ptr(),
                option_mask,
                ntree_limit,
                &mut out_len,
                &mut out_result,
            )
        };
        if ret == 0 {
            debug!("XGBoosterPredict returned {} values", out_len);
            *out = copy_floats(out_result, out_len);
        }
        ret
    }

    fn booster_save_model(&self, handle: RawHandle, fname: &CStr) -> i32 {
        unsafe { xgboost_sys::XGBoosterSaveModel(handle.as_ptr(), fname.as_ptr()) }
    }

    fn booster_load_model(&self, handle: RawHandle, fname: &CStr) -> i32 {
        unsafe { xgboost_sys::XGBoosterLoadModel(handle.as_ptr(), fname.as_ptr()) }
    }

    fn booster_dump_model(
        &self,
        handle: RawHandle,
        fmap: &CStr,
        with_stats: i32,
        out: &mut Vec<String>,
    ) -> i32 {
        let mut out_len = 0;
        let mut out_dump_array = ptr::null_mut();
        let ret = unsafe {
            xgboost_sys::XGBoosterDumpModel(
                handle.as_ptr(),
                fmap.as_ptr(),
                with_stats,
                &mut out_len,
                &mut out_dump_array,
            )
        };
        if ret == 0 && !out_dump_array.is_null() {
            let out_ptr_slice = unsafe { slice::from_raw_parts(out_dump_array, out_len as usize) };
            *out = out_ptr_slice.iter().map(|str_ptr| copy_string(*str_ptr)).collect();
        }
        ret
    }
}
