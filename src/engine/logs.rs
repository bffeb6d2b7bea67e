//! Multiplexed log stream demultiplexing
//!
//! Without a TTY the engine interleaves stdout and stderr as frames of
//! `stream:u8 | padding:3 | size:u32be | payload`. Payloads are
//! concatenated in arrival order; an incomplete trailing frame is dropped.

const FRAME_HEADER_LEN: usize = 8;

/// Decode a multiplexed log body into one string.
///
/// Bodies from TTY-enabled containers carry no framing; those are detected
/// by an impossible header and returned as-is.
pub fn demux_log_stream(data: &[u8]) -> String {
    if !data.is_empty() && !looks_multiplexed(data) {
        return String::from_utf8_lossy(data).into_owned();
    }

    let mut out = String::new();
    let mut rest = data;
    while rest.len() >= FRAME_HEADER_LEN {
        if !valid_header(rest) {
            break;
        }
        let size = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as usize;
        let Some(frame_end) = FRAME_HEADER_LEN.checked_add(size) else {
            break;
        };
        if rest.len() < frame_end {
            // incomplete trailing frame
            break;
        }
        out.push_str(&String::from_utf8_lossy(&rest[FRAME_HEADER_LEN..frame_end]));
        rest = &rest[frame_end..];
    }
    out
}

/// stream byte 0..=2 (stdin/stdout/stderr) and zero padding.
fn valid_header(data: &[u8]) -> bool {
    data[0] <= 2 && data[1] == 0 && data[2] == 0 && data[3] == 0
}

fn looks_multiplexed(data: &[u8]) -> bool {
    data.len() >= FRAME_HEADER_LEN && valid_header(data)
}
