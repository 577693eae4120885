//! Local HTTP/2 SETTINGS advertised at session start.
//!
//! Based on Chromium's spdy_session.h defaults. Only values that differ from
//! the RFC 7540 defaults go on the wire.

use crate::spdy::protocol::{
    SettingsId, DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
};

/// HTTP/2 SETTINGS configuration.
/// Values are sent in the SETTINGS frame during connection setup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct H2Settings {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1) - HPACK dynamic table size
    pub header_table_size: u32,
    /// SETTINGS_ENABLE_PUSH (0x2) - Server push enabled
    pub enable_push: bool,
    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3) - limit on pushed streams
    pub max_concurrent_streams: u32,
    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4) - per-stream receive window
    pub initial_window_size: u32,
    /// SETTINGS_MAX_FRAME_SIZE (0x5) - Maximum frame payload we accept
    pub max_frame_size: u32,
    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6) - 0 means not advertised
    pub max_header_list_size: u32,
}

impl Default for H2Settings {
    fn default() -> Self {
        Self {
            header_table_size: 65536,
            enable_push: true,
            max_concurrent_streams: 1000,
            initial_window_size: 6 * 1024 * 1024, // Chrome's per-stream window
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: 256 * 1024,
        }
    }
}

impl H2Settings {
    /// Defaults with server push refused.
    pub fn without_push() -> Self {
        Self { enable_push: false, ..Self::default() }
    }

    /// Settings entries that differ from the protocol defaults, in id order.
    pub fn to_frame_values(&self) -> Vec<(SettingsId, u32)> {
        let mut values = Vec::new();
        if self.header_table_size != DEFAULT_HEADER_TABLE_SIZE {
            values.push((SettingsId::HeaderTableSize, self.header_table_size));
        }
        if !self.enable_push {
            values.push((SettingsId::EnablePush, 0));
        }
        values.push((SettingsId::MaxConcurrentStreams, self.max_concurrent_streams));
        if self.initial_window_size != DEFAULT_INITIAL_WINDOW_SIZE as u32 {
            values.push((SettingsId::InitialWindowSize, self.initial_window_size));
        }
        if self.max_frame_size != DEFAULT_MAX_FRAME_SIZE {
            values.push((SettingsId::MaxFrameSize, self.max_frame_size));
        }
        if self.max_header_list_size != 0 {
            values.push((SettingsId::MaxHeaderListSize, self.max_header_list_size));
        }
        values
    }
}
