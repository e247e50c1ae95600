//! HLS media playlist generation.
//!
//! Emits the live sliding-window playlist served to time-shifted listeners.
//! The tag set matters: players key segment identity off
//! `EXT-X-MEDIA-SEQUENCE`, so the caller controls it explicitly.

use std::fmt::Write;

/// One media segment entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub uri: String,
    pub duration: f64,
}

/// A live media playlist window.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    /// Sequence number of the first segment (EXT-X-MEDIA-SEQUENCE).
    pub media_sequence: i64,
    pub segments: Vec<Segment>,
}

impl MediaPlaylist {
    /// Longest segment duration, rounded up to whole seconds.
    pub fn target_duration(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.duration)
            .fold(0.0f64, f64::max)
            .ceil() as u64
    }
}

/// Render the playlist as M3U8 text.
///
/// No `EXT-X-ENDLIST`: the playlist is live and the client is expected to
/// poll for the advancing window.
pub fn generate_media_playlist(playlist: &MediaPlaylist) -> String {
    let mut out = String::new();

    writeln!(out, "#EXTM3U").unwrap();
    writeln!(out, "#EXT-X-VERSION:4").unwrap();
    writeln!(out, "#EXT-X-ALLOW-CACHE:YES").unwrap();
    writeln!(out, "#EXT-X-TARGETDURATION:{}", playlist.target_duration()).unwrap();
    writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", playlist.media_sequence).unwrap();

    for segment in &playlist.segments {
        writeln!(out, "#EXTINF:{:.3},", segment.duration).unwrap();
        writeln!(out, "{}", segment.uri).unwrap();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_duration_rounds_up() {
        let pl = MediaPlaylist {
            media_sequence: 1,
            segments: vec![
                Segment {
                    uri: "a.ts".into(),
                    duration: 6.1,
                },
                Segment {
                    uri: "b.ts".into(),
                    duration: 5.9,
                },
            ],
        };
        assert_eq!(pl.target_duration(), 7);
    }

    #[test]
    fn empty_playlist_has_zero_target() {
        let pl = MediaPlaylist {
            media_sequence: 0,
            segments: vec![],
        };
        assert_eq!(pl.target_duration(), 0);
    }

    #[test]
    fn format_exact() {
        let pl = MediaPlaylist {
            media_sequence: 42,
            segments: vec![
                Segment {
                    uri: "/segment/jjj/chunk-100.ts".into(),
                    duration: 6.0,
                },
                Segment {
                    uri: "/segment/jjj/chunk-101.ts".into(),
                    duration: 5.5,
                },
            ],
        };

        let expected = "\
#EXTM3U
#EXT-X-VERSION:4
#EXT-X-ALLOW-CACHE:YES
#EXT-X-TARGETDURATION:6
#EXT-X-MEDIA-SEQUENCE:42
#EXTINF:6.000,
/segment/jjj/chunk-100.ts
#EXTINF:5.500,
/segment/jjj/chunk-101.ts
";
        assert_eq!(generate_media_playlist(&pl), expected);
    }

    #[test]
    fn live_playlist_has_no_endlist() {
        let pl = MediaPlaylist {
            media_sequence: 1,
            segments: vec![Segment {
                uri: "a.ts".into(),
                duration: 2.0,
            }],
        };
        assert!(!generate_media_playlist(&pl).contains("#EXT-X-ENDLIST"));
    }
}
