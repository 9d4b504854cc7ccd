use std::{
    ffi::{c_char, c_void, CStr, CString},
    ptr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use fx_core::{spawn_rate_ticker, Runtime, TickerHandle};
use serde_json::json;

type FxEventCallback = unsafe extern "C" fn(event_json: *const c_char, user_data: *mut c_void);

#[derive(Clone, Copy)]
struct CallbackRegistration {
    callback: FxEventCallback,
    user_data: usize,
}

type CallbackSlot = Arc<Mutex<Option<CallbackRegistration>>>;

/// Opaque handle given to the shell. Owns the async executor that every
/// blocking entry point drives.
pub struct FxRuntimeHandle {
    ticker: Mutex<Option<TickerHandle>>,
    runtime: Arc<Runtime>,
    callback: CallbackSlot,
    executor: tokio::runtime::Runtime,
}

#[no_mangle]
pub unsafe extern "C" fn fx_runtime_new(config_json: *const c_char) -> *mut FxRuntimeHandle {
    let config = if config_json.is_null() {
        String::new()
    } else {
        match CStr::from_ptr(config_json).to_str() {
            Ok(value) => value.to_string(),
            Err(error) => {
                log::error!("fx_runtime_new: invalid UTF-8 config json: {error}");
                return ptr::null_mut();
            }
        }
    };

    let executor = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
    {
        Ok(value) => value,
        Err(error) => {
            log::error!("fx_runtime_new: failed to start executor: {error}");
            return ptr::null_mut();
        }
    };

    let runtime = match Runtime::new(&config) {
        Ok(value) => value,
        Err(error) => {
            log::error!("fx_runtime_new: failed to initialize runtime: {error:#}");
            return ptr::null_mut();
        }
    };

    let callback: CallbackSlot = Arc::new(Mutex::new(None));
    let callback_ref = Arc::clone(&callback);
    runtime.set_event_callback(move |_event, payload| {
        let registration = *callback_ref.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(registration) = registration {
            if let Ok(c_payload) = CString::new(payload.to_string()) {
                unsafe {
                    (registration.callback)(c_payload.as_ptr(), registration.user_data as *mut c_void)
                };
            }
        }
    });

    Box::into_raw(Box::new(FxRuntimeHandle {
        ticker: Mutex::new(None),
        runtime: Arc::new(runtime),
        callback,
        executor,
    }))
}

#[no_mangle]
pub unsafe extern "C" fn fx_runtime_free(handle: *mut FxRuntimeHandle) {
    if handle.is_null() {
        return;
    }
    let boxed = Box::from_raw(handle);
    if let Some(ticker) = boxed.ticker.lock().unwrap_or_else(PoisonError::into_inner).take() {
        ticker.stop();
    }
    boxed.runtime.clear_event_callback();
    *boxed.callback.lock().unwrap_or_else(PoisonError::into_inner) = None;
}

#[no_mangle]
pub unsafe extern "C" fn fx_set_event_callback(
    handle: *mut FxRuntimeHandle,
    callback: Option<FxEventCallback>,
    user_data: *mut c_void,
) {
    if handle.is_null() {
        return;
    }

    let handle = &*handle;
    *handle.callback.lock().unwrap_or_else(PoisonError::into_inner) =
        callback.map(|value| CallbackRegistration {
            callback: value,
            user_data: user_data as usize,
        });
}

/// Starts (or restarts) the periodic rate refresh. Zero uses the configured
/// interval.
#[no_mangle]
pub unsafe extern "C" fn fx_start_rate_ticker(handle: *mut FxRuntimeHandle, interval_secs: u64) {
    if handle.is_null() {
        return;
    }

    let handle = &*handle;
    let secs = if interval_secs == 0 {
        handle.runtime.config().refresh_interval_secs
    } else {
        interval_secs
    };
    let _entered = handle.executor.enter();
    let ticker = spawn_rate_ticker(Arc::clone(&handle.runtime), Duration::from_secs(secs));
    let previous = handle
        .ticker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(ticker);
    if let Some(previous) = previous {
        previous.stop();
    }
}

#[no_mangle]
pub unsafe extern "C" fn fx_stop_rate_ticker(handle: *mut FxRuntimeHandle) {
    if handle.is_null() {
        return;
    }

    let handle = &*handle;
    let ticker = handle
        .ticker
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(ticker) = ticker {
        ticker.stop();
    }
}

#[no_mangle]
pub unsafe extern "C" fn fx_invoke_json(
    handle: *mut FxRuntimeHandle,
    request_json: *const c_char,
) -> *mut c_char {
    if handle.is_null() {
        return into_c_string(json_error("invalid_handle", "runtime handle is null").to_string());
    }
    if request_json.is_null() {
        return into_c_string(json_error("invalid_request", "request_json is null").to_string());
    }

    let request = match CStr::from_ptr(request_json).to_str() {
        Ok(value) => value,
        Err(error) => {
            return into_c_string(
                json_error("invalid_request", &format!("request_json must be UTF-8: {error}"))
                    .to_string(),
            );
        }
    };

    let handle = &*handle;
    let response = handle.executor.block_on(handle.runtime.invoke_json(request));
    into_c_string(response)
}

#[no_mangle]
pub unsafe extern "C" fn fx_free_c_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }
    let _ = CString::from_raw(ptr);
}

fn into_c_string(value: String) -> *mut c_char {
    let text = CString::new(value).or_else(|_| {
        CString::new(
            r#"{"ok":false,"error":{"code":"encoding_failure","message":"response contains invalid NUL"}}"#,
        )
    });
    match text {
        Ok(text) => text.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn json_error(code: &str, message: &str) -> serde_json::Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message
        }
    })
}
