//! `ze_result_t` codes, shared by the Level Zero driver and the host
//! reference driver that emulates its surface

use crate::error::Status;

pub const SUCCESS: i32 = 0;
pub const ERROR_DEVICE_LOST: i32 = 0x70000001;
pub const ERROR_OUT_OF_HOST_MEMORY: i32 = 0x70000002;
pub const ERROR_OUT_OF_DEVICE_MEMORY: i32 = 0x70000003;
pub const ERROR_MODULE_BUILD_FAILURE: i32 = 0x70000004;
pub const ERROR_UNINITIALIZED: i32 = 0x78000001;
pub const ERROR_UNSUPPORTED_FEATURE: i32 = 0x78000003;
pub const ERROR_INVALID_ARGUMENT: i32 = 0x78000004;
pub const ERROR_INVALID_NULL_HANDLE: i32 = 0x78000005;
pub const ERROR_HANDLE_OBJECT_IN_USE: i32 = 0x78000006;
pub const ERROR_INVALID_NULL_POINTER: i32 = 0x78000007;
pub const ERROR_INVALID_SIZE: i32 = 0x78000008;
pub const ERROR_UNSUPPORTED_SIZE: i32 = 0x78000009;
pub const ERROR_INVALID_NATIVE_BINARY: i32 = 0x7800000f;
pub const ERROR_INVALID_KERNEL_NAME: i32 = 0x78000011;
pub const ERROR_INVALID_GROUP_SIZE_DIMENSION: i32 = 0x78000013;
pub const ERROR_INVALID_GLOBAL_WIDTH_DIMENSION: i32 = 0x78000014;
pub const ERROR_INVALID_KERNEL_ARGUMENT_INDEX: i32 = 0x78000015;
pub const ERROR_INVALID_KERNEL_ARGUMENT_SIZE: i32 = 0x78000016;
pub const ERROR_UNKNOWN: i32 = 0x7ffffffe;

pub fn name(code: i32) -> &'static str {
    match code {
        SUCCESS => "ZE_RESULT_SUCCESS",
        ERROR_DEVICE_LOST => "ZE_RESULT_ERROR_DEVICE_LOST",
        ERROR_OUT_OF_HOST_MEMORY => "ZE_RESULT_ERROR_OUT_OF_HOST_MEMORY",
        ERROR_OUT_OF_DEVICE_MEMORY => "ZE_RESULT_ERROR_OUT_OF_DEVICE_MEMORY",
        ERROR_MODULE_BUILD_FAILURE => "ZE_RESULT_ERROR_MODULE_BUILD_FAILURE",
        ERROR_UNINITIALIZED => "ZE_RESULT_ERROR_UNINITIALIZED",
        ERROR_UNSUPPORTED_FEATURE => "ZE_RESULT_ERROR_UNSUPPORTED_FEATURE",
        ERROR_INVALID_ARGUMENT => "ZE_RESULT_ERROR_INVALID_ARGUMENT",
        ERROR_INVALID_NULL_HANDLE => "ZE_RESULT_ERROR_INVALID_NULL_HANDLE",
        ERROR_HANDLE_OBJECT_IN_USE => "ZE_RESULT_ERROR_HANDLE_OBJECT_IN_USE",
        ERROR_INVALID_NULL_POINTER => "ZE_RESULT_ERROR_INVALID_NULL_POINTER",
        ERROR_INVALID_SIZE => "ZE_RESULT_ERROR_INVALID_SIZE",
        ERROR_UNSUPPORTED_SIZE => "ZE_RESULT_ERROR_UNSUPPORTED_SIZE",
        ERROR_INVALID_NATIVE_BINARY => "ZE_RESULT_ERROR_INVALID_NATIVE_BINARY",
        ERROR_INVALID_KERNEL_NAME => "ZE_RESULT_ERROR_INVALID_KERNEL_NAME",
        ERROR_INVALID_GROUP_SIZE_DIMENSION => "ZE_RESULT_ERROR_INVALID_GROUP_SIZE_DIMENSION",
        ERROR_INVALID_GLOBAL_WIDTH_DIMENSION => "ZE_RESULT_ERROR_INVALID_GLOBAL_WIDTH_DIMENSION",
        ERROR_INVALID_KERNEL_ARGUMENT_INDEX => "ZE_RESULT_ERROR_INVALID_KERNEL_ARGUMENT_INDEX",
        ERROR_INVALID_KERNEL_ARGUMENT_SIZE => "ZE_RESULT_ERROR_INVALID_KERNEL_ARGUMENT_SIZE",
        ERROR_UNKNOWN => "ZE_RESULT_ERROR_UNKNOWN",
        _ => "ZE_RESULT_UNRECOGNISED",
    }
}

pub fn status(code: i32) -> Status {
    Status::new(code, name(code))
}

pub fn check(code: i32) -> Result<(), Status> {
    if code == SUCCESS { Ok(()) } else { Err(status(code)) }
}
