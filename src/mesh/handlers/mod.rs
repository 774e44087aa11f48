//! Control-frame dispatch and the key-exchange handler bundle.

mod ans_key;
mod dispatch;
mod key_changed;
mod req_key;
