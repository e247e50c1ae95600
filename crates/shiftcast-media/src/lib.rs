//! shiftcast-media: media plumbing shared by the fetch and serve paths.
//!
//! - [`ring`]: the memory-mapped fixed-bitrate ring buffer backing icy
//!   streams.
//! - [`hls`]: HLS media playlist generation for the time-shifted window.
//! - [`ts`]: MPEG-TS demultiplexing, stripping TS and PES framing down to a
//!   continuous audio elementary stream.

pub mod hls;
pub mod ring;
pub mod ts;
