//! Test payloads shared by the integration and E2E suites

#![allow(dead_code)]

/// Multipart boundary used by every hand-built request body.
pub const BOUNDARY: &str = "sentinel-test-boundary";

/// Stand-in for an uploaded video. Content is never decoded by the fake backend.
pub fn video_payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Ten megabytes, the size used in the upload scenario.
pub fn ten_megabyte_video() -> Vec<u8> {
    video_payload(10 * 1024 * 1024)
}

pub const TEXT_PAYLOAD: &[u8] = b"this is not a video\n";

/// Footage names out of chronological order, with their expected listing order.
pub struct FootageFixture {
    pub names: &'static [&'static str],
    pub expected_order: &'static [&'static str],
}

pub const FOOTAGE: FootageFixture = FootageFixture {
    names: &[
        "20240115_083000_120.mp4",
        "20240301_191500_000.mp4",
        "20231231_235959_999.mp4",
    ],
    expected_order: &[
        "20240301_191500_000.mp4",
        "20240115_083000_120.mp4",
        "20231231_235959_999.mp4",
    ],
};

/// Per-frame watched-label presence for a live stream that records one
/// segment and then loses the subject for good.
pub const LIVE_PRESENCE: &[bool] = &[true, true, true, false, false, false, false, false];

/// Smallest byte sequence with JPEG start and end markers.
pub const JPEG_FRAME: &[u8] = &[0xFF, 0xD8, 0xFF, 0xD9];
