//! PDH native counter source.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use windows::core::{PCWSTR, PWSTR};
use windows::Win32::System::Performance::{
    PdhAddEnglishCounterW, PdhCloseQuery, PdhCollectQueryDataWithTime, PdhEnumObjectItemsW,
    PdhGetRawCounterValue, PdhLookupPerfNameByIndexW, PdhOpenQueryW, PdhRemoveCounter,
    PDH_HCOUNTER, PDH_HQUERY, PDH_RAW_COUNTER, PERF_DETAIL_WIZARD,
};

use super::{split_multi_sz, wide};
use crate::perfmon::source::{NativeCounterSource, NativeHandle};

const ERROR_SUCCESS: u32 = 0;
const PDH_MORE_DATA: u32 = 0x8000_07D2;
const PDH_NO_DATA: u32 = 0x8000_07D5;
const PDH_CSTATUS_VALID_DATA: u32 = 0x0000_0000;
const PDH_CSTATUS_NEW_DATA: u32 = 0x0000_0001;

const UPDATE_RETRIES: u32 = 3;

/// 100ns intervals between 1601-01-01 and 1970-01-01, in milliseconds.
const EPOCH_DIFF_MS: i64 = 11_644_473_600_000;

const ENGLISH_COUNTER_KEY: &str = "SOFTWARE\\Microsoft\\Windows NT\\CurrentVersion\\Perflib\\009";
const ENGLISH_COUNTER_VALUE: &str = "Counter";

/// Native source backed by the Performance Data Helper library.
pub struct PdhCounterSource {
    localize: bool,
    english_index: OnceLock<HashMap<String, u32>>,
}

impl PdhCounterSource {
    pub fn new(localize: bool) -> Self {
        Self {
            localize,
            english_index: OnceLock::new(),
        }
    }

    fn query(handle: NativeHandle) -> PDH_HQUERY {
        PDH_HQUERY(handle.0 as _)
    }

    fn counter(handle: NativeHandle) -> PDH_HCOUNTER {
        PDH_HCOUNTER(handle.0 as _)
    }

    fn collect(query: PDH_HQUERY, timestamp: &mut i64) -> u32 {
        unsafe { PdhCollectQueryDataWithTime(query, timestamp) }
    }

    /// English counter-name table, lower-cased name to index.
    fn english_index(&self) -> &HashMap<String, u32> {
        self.english_index.get_or_init(|| {
            use winreg::enums::HKEY_LOCAL_MACHINE;
            use winreg::RegKey;

            let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
            let names: Vec<String> = match hklm
                .open_subkey(ENGLISH_COUNTER_KEY)
                .and_then(|key| key.get_value(ENGLISH_COUNTER_VALUE))
            {
                Ok(names) => names,
                Err(e) => {
                    log::debug!("Cannot read English counter names: {}", e);
                    return HashMap::new();
                }
            };

            names
                .chunks_exact(2)
                .filter_map(|pair| {
                    let index = pair[0].trim().parse().ok()?;
                    Some((pair[1].to_lowercase(), index))
                })
                .collect()
        })
    }

    fn lookup_name_by_index(index: u32) -> Option<String> {
        let mut size: u32 = 256;
        for _ in 0..2 {
            let mut buf = vec![0u16; size as usize];
            let ret = unsafe {
                PdhLookupPerfNameByIndexW(PCWSTR::null(), index, PWSTR(buf.as_mut_ptr()), &mut size)
            };
            match ret {
                ERROR_SUCCESS => {
                    let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
                    return Some(String::from_utf16_lossy(&buf[..len]));
                }
                PDH_MORE_DATA => continue,
                _ => {
                    log::debug!("PdhLookupPerfNameByIndex({}) failed: 0x{:08X}", index, ret);
                    return None;
                }
            }
        }
        None
    }
}

impl NativeCounterSource for PdhCounterSource {
    fn open_query(&self) -> Option<NativeHandle> {
        let mut query = PDH_HQUERY::default();
        let ret = unsafe { PdhOpenQueryW(PCWSTR::null(), 0, &mut query) };
        if ret != ERROR_SUCCESS {
            log::warn!("PdhOpenQuery failed: 0x{:08X}", ret);
            return None;
        }
        Some(NativeHandle(query.0 as usize))
    }

    fn add_counter(&self, query: NativeHandle, path: &str) -> Option<NativeHandle> {
        let path_w = wide(path);
        let mut counter = PDH_HCOUNTER::default();
        let ret = unsafe {
            PdhAddEnglishCounterW(Self::query(query), PCWSTR(path_w.as_ptr()), 0, &mut counter)
        };
        if ret != ERROR_SUCCESS {
            log::debug!("PdhAddEnglishCounter({}) failed: 0x{:08X}", path, ret);
            return None;
        }
        Some(NativeHandle(counter.0 as usize))
    }

    fn update_query(&self, query: NativeHandle) -> u64 {
        let handle = Self::query(query);
        let mut timestamp: i64 = 0;
        let mut ret = Self::collect(handle, &mut timestamp);

        // The first collection after adding counters can race with the provider.
        let mut retries = 0;
        while ret == PDH_NO_DATA && retries < UPDATE_RETRIES {
            retries += 1;
            std::thread::sleep(Duration::from_millis(1 << retries));
            ret = Self::collect(handle, &mut timestamp);
        }
        if ret != ERROR_SUCCESS {
            log::warn!("PdhCollectQueryDataWithTime failed: 0x{:08X}", ret);
            return 0;
        }

        // Collection time is a local FILETIME.
        let local_ms = timestamp / 10_000 - EPOCH_DIFF_MS;
        let offset_ms = i64::from(chrono::Local::now().offset().local_minus_utc()) * 1000;
        (local_ms - offset_ms).max(1) as u64
    }

    fn read_counter(&self, counter: NativeHandle) -> i64 {
        let mut raw = PDH_RAW_COUNTER::default();
        let ret = unsafe { PdhGetRawCounterValue(Self::counter(counter), None, &mut raw) };
        if ret != ERROR_SUCCESS {
            return -i64::from(ret);
        }
        if raw.CStatus != PDH_CSTATUS_VALID_DATA && raw.CStatus != PDH_CSTATUS_NEW_DATA {
            return -i64::from(raw.CStatus);
        }
        raw.FirstValue
    }

    fn remove_counter(&self, counter: NativeHandle) {
        let ret = unsafe { PdhRemoveCounter(Self::counter(counter)) };
        if ret != ERROR_SUCCESS {
            log::debug!("PdhRemoveCounter failed: 0x{:08X}", ret);
        }
    }

    fn close_query(&self, query: NativeHandle) {
        let ret = unsafe { PdhCloseQuery(Self::query(query)) };
        if ret != ERROR_SUCCESS {
            log::debug!("PdhCloseQuery failed: 0x{:08X}", ret);
        }
    }

    fn list_instances(&self, category: &str) -> Option<Vec<String>> {
        let object = wide(category);
        let mut counter_len: u32 = 0;
        let mut instance_len: u32 = 0;

        let ret = unsafe {
            PdhEnumObjectItemsW(
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR(object.as_ptr()),
                PWSTR::null(),
                &mut counter_len,
                PWSTR::null(),
                &mut instance_len,
                PERF_DETAIL_WIZARD,
                0,
            )
        };
        if ret != PDH_MORE_DATA && ret != ERROR_SUCCESS {
            log::warn!("PdhEnumObjectItems({}) failed: 0x{:08X}", category, ret);
            return None;
        }
        if instance_len == 0 {
            return Some(Vec::new());
        }

        let mut counters = vec![0u16; counter_len as usize];
        let mut instances = vec![0u16; instance_len as usize];
        let ret = unsafe {
            PdhEnumObjectItemsW(
                PCWSTR::null(),
                PCWSTR::null(),
                PCWSTR(object.as_ptr()),
                PWSTR(counters.as_mut_ptr()),
                &mut counter_len,
                PWSTR(instances.as_mut_ptr()),
                &mut instance_len,
                PERF_DETAIL_WIZARD,
                0,
            )
        };
        if ret != ERROR_SUCCESS {
            log::warn!("PdhEnumObjectItems({}) failed: 0x{:08X}", category, ret);
            return None;
        }
        Some(split_multi_sz(&instances))
    }

    fn localize_category(&self, english: &str) -> Option<String> {
        if !self.localize {
            return None;
        }
        let index = *self.english_index().get(&english.to_lowercase())?;
        Self::lookup_name_by_index(index)
    }
}
