//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`](neterror::NetError): Network error codes matching `net_error_list.h`
//! - [`RequestFailure`](failure::RequestFailure): An error plus how far the request got
//! - [`RequestPriority`](requestpriority::RequestPriority): `request_priority.h`
//! - [`LoadState`](loadstate::LoadState): Request loading states from `load_states_list.h`

pub mod context;
pub mod failure;
pub mod loadstate;
pub mod neterror;
pub mod requestpriority;
