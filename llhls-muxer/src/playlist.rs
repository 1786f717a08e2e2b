//! LL-HLS media playlist rendering.

use std::time::Duration;

use crate::config::MuxerConfig;
use crate::segment::{Fragment, Segment};
use crate::store::SegmentStore;

/// Playlist version advertised in `#EXT-X-VERSION`.
pub const PLAYLIST_VERSION: u32 = 7;

/// Number of newest segments whose parts are listed.
pub const PART_SEGMENTS: usize = 2;

const PROGRAM_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

fn seconds(duration: Duration) -> String {
    format!("{:.5}", duration.as_secs_f64())
}

fn fragment_uri(source_id: &str, sequence: u64, index: usize) -> String {
    format!("fragment/{sequence}/{index}/{source_id}.{sequence}.{index}.m4s")
}

fn segment_uri(source_id: &str, sequence: u64) -> String {
    format!("segment/{sequence}/{source_id}.{sequence}.m4s")
}

fn push_parts(out: &mut String, source_id: &str, segment: &Segment) {
    for (index, fragment) in segment.fragments().iter().enumerate() {
        let uri = fragment_uri(source_id, segment.sequence(), index);
        if fragment.is_finished() {
            push_part(out, fragment, &uri);
        } else {
            out.push_str(&format!("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"{uri}\"\n"));
            // Only the first unfinished part is hinted.
            break;
        }
    }
}

fn push_part(out: &mut String, fragment: &Fragment, uri: &str) {
    let independent = if fragment.is_independent() {
        ",INDEPENDENT=YES"
    } else {
        ""
    };
    out.push_str(&format!(
        "#EXT-X-PART:DURATION={}{independent},URI=\"{uri}\"\n",
        seconds(fragment.duration())
    ));
}

/// Render the playlist for the current store state.
///
/// The output depends only on `store`, `source_id` and `config`; rendering
/// the same state twice yields the same text.
#[must_use]
pub fn render(store: &SegmentStore, source_id: &str, config: &MuxerConfig) -> String {
    let segment_target = store
        .last_segment_duration()
        .unwrap_or_else(|| config.initial_target_duration());
    let part_target = store.last_fragment_duration().unwrap_or(Duration::ZERO);
    let hold_back = config.hold_back_multiplier;

    let mut m3u8_content = String::new();

    // Header
    m3u8_content.push_str("#EXTM3U\n");
    m3u8_content.push_str(&format!(
        "#EXT-X-TARGETDURATION:{}\n",
        segment_target.as_secs_f64().round() as u64
    ));
    m3u8_content.push_str(&format!("#EXT-X-VERSION:{PLAYLIST_VERSION}\n"));
    m3u8_content.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
    m3u8_content.push_str(&format!(
        "#EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK={},HOLD-BACK={}\n",
        seconds(part_target * hold_back),
        seconds(segment_target * hold_back)
    ));
    m3u8_content.push_str(&format!("#EXT-X-MAP:URI=\"{}\"\n", config.init_segment_uri));
    m3u8_content.push_str(&format!(
        "#EXT-X-PART-INF:PART-TARGET={}\n",
        seconds(part_target)
    ));
    m3u8_content.push_str(&format!(
        "#EXT-X-MEDIA-SEQUENCE:{}\n",
        store.media_sequence_base()
    ));

    // Segments, oldest first
    let parts_from = store.len().saturating_sub(PART_SEGMENTS);
    for (position, segment) in store.iter().enumerate() {
        if position >= parts_from {
            push_parts(&mut m3u8_content, source_id, segment);
        }

        if segment.is_finished() {
            if let Some(closed_at) = segment.closed_at() {
                m3u8_content.push_str(&format!(
                    "#EXT-X-PROGRAM-DATE-TIME:{}\n",
                    closed_at.format(PROGRAM_DATE_TIME_FORMAT)
                ));
            }
            m3u8_content.push_str(&format!("#EXTINF:{},\n", seconds(segment.duration())));
            m3u8_content.push_str(&segment_uri(source_id, segment.sequence()));
            m3u8_content.push('\n');
        }
    }

    m3u8_content
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Packet;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    fn packet(key: bool) -> Packet {
        Packet::new(key, Duration::from_millis(40), Bytes::from_static(b"au"))
    }

    /// Write `packets` packets into a fresh segment, cutting parts every 5.
    fn write_segment(store: &mut SegmentStore, packets: usize) {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store.close_current(now);
        store.open_segment(now);
        for i in 0..packets {
            let segment = store.current_mut().unwrap();
            segment.push(packet(i == 0));
            if segment.last_fragment().unwrap().len() == 5 {
                let duration = segment.cut_fragment();
                store.record_fragment(duration);
            }
        }
    }

    #[test]
    fn test_empty_playlist_header() {
        let store = SegmentStore::new(6);
        let playlist = render(&store, "cam", &MuxerConfig::default());

        assert_eq!(
            playlist,
            "#EXTM3U\n\
             #EXT-X-TARGETDURATION:2\n\
             #EXT-X-VERSION:7\n\
             #EXT-X-INDEPENDENT-SEGMENTS\n\
             #EXT-X-SERVER-CONTROL:CAN-BLOCK-RELOAD=YES,PART-HOLD-BACK=0.00000,HOLD-BACK=8.00000\n\
             #EXT-X-MAP:URI=\"init.mp4\"\n\
             #EXT-X-PART-INF:PART-TARGET=0.00000\n\
             #EXT-X-MEDIA-SEQUENCE:0\n"
        );
    }

    #[test]
    fn test_open_segment_lists_parts_and_hint() {
        let mut store = SegmentStore::new(6);
        write_segment(&mut store, 12);

        let playlist = render(&store, "cam", &MuxerConfig::default());

        assert!(playlist.contains(
            "#EXT-X-PART:DURATION=0.20000,INDEPENDENT=YES,URI=\"fragment/0/0/cam.0.0.m4s\"\n"
        ));
        assert!(playlist.contains("#EXT-X-PART:DURATION=0.20000,URI=\"fragment/0/1/cam.0.1.m4s\"\n"));
        assert!(playlist.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"fragment/0/2/cam.0.2.m4s\"\n"));
        assert!(playlist.contains("#EXT-X-PART-INF:PART-TARGET=0.20000\n"));
        assert!(playlist.contains("PART-HOLD-BACK=0.80000,"));
        assert!(!playlist.contains("#EXTINF"));
        assert_eq!(playlist.matches("#EXT-X-PRELOAD-HINT").count(), 1);
    }

    #[test]
    fn test_finished_segment_entry() {
        let mut store = SegmentStore::new(6);
        write_segment(&mut store, 100);
        write_segment(&mut store, 3);

        let playlist = render(&store, "cam", &MuxerConfig::default());

        assert!(playlist.contains("#EXT-X-TARGETDURATION:4\n"));
        assert!(playlist.contains("HOLD-BACK=16.00000\n"));
        assert!(playlist.contains(
            "#EXT-X-PROGRAM-DATE-TIME:2024-05-01T12:00:00.000000Z\n\
             #EXTINF:4.00000,\n\
             segment/0/cam.0.m4s\n"
        ));
        assert_eq!(playlist.matches("#EXT-X-PART:DURATION").count(), 20);
        assert!(playlist.contains("#EXT-X-PRELOAD-HINT:TYPE=PART,URI=\"fragment/1/0/cam.1.0.m4s\"\n"));
    }

    #[test]
    fn test_parts_only_for_newest_segments() {
        let mut store = SegmentStore::new(6);
        for _ in 0..4 {
            write_segment(&mut store, 10);
        }

        let playlist = render(&store, "cam", &MuxerConfig::default());

        assert!(!playlist.contains("fragment/0/"));
        assert!(!playlist.contains("fragment/1/"));
        assert!(playlist.contains("fragment/2/1/cam.2.1.m4s"));
        assert!(playlist.contains("fragment/3/0/cam.3.0.m4s"));
        assert_eq!(playlist.matches("#EXTINF").count(), 3);
    }

    #[test]
    fn test_render_is_deterministic() {
        let mut store = SegmentStore::new(6);
        write_segment(&mut store, 100);
        write_segment(&mut store, 7);
        let config = MuxerConfig::default();

        assert_eq!(render(&store, "cam", &config), render(&store, "cam", &config));
    }

    #[test]
    fn test_media_sequence_tracks_evictions() {
        let mut store = SegmentStore::new(2);
        for _ in 0..5 {
            write_segment(&mut store, 5);
        }

        let playlist = render(&store, "cam", &MuxerConfig::default());

        assert!(playlist.contains("#EXT-X-MEDIA-SEQUENCE:3\n"));
        assert!(playlist.contains("segment/3/cam.3.m4s\n"));
        assert!(!playlist.contains("segment/2/"));
    }
}
