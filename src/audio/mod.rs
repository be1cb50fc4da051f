// Module audio - CPAL output, track playback, click synthesis and offline export

pub mod buffer_transport;
pub mod click;
pub mod dsp_utils;
pub mod engine;
pub mod export;
pub mod loader;
pub mod mixer;
pub mod timing;
