//! SDP audio-level header extension injection, publisher offer generation
//! only.
//!
//! Pure string manipulation so the algorithm is unit-testable without a
//! real `RTCPeerConnection` — the boundary cases (no audio section, all
//! extmap ids taken) are exercised directly against plain SDP strings.

const AUDIO_LEVEL_URI: &str = "urn:ietf:params:rtp-hdrext:ssrc-audio-level";
const MAX_EXTMAP_ID: u8 = 14;
const INSERTION_ANCHORS: [&str; 3] = ["a=sendrecv", "a=sendonly", "a=recvonly"];

/// Result of attempting to inject the audio-level extension into an offer.
#[derive(Debug, Clone)]
pub struct AudioLevelInjection {
    pub sdp: String,
    /// `None` when injection was skipped (no audio m-section anchor, or all
    /// 14 extmap ids already in use) — the original SDP is forwarded as-is.
    pub extmap_id: Option<u8>,
    /// Parsed from the (possibly rewritten) SDP's first `a=rtpmap:<pt>
    /// opus/...` line, regardless of whether injection happened.
    pub opus_payload_type: Option<u8>,
}

/// Locate the audio m-section: `m=audio ...` up to the next `m=` line or EOF.
fn audio_section_bounds(sdp: &str) -> Option<(usize, usize)> {
    let start = sdp.find("m=audio")?;
    let rest = &sdp[start..];
    let end = rest
        .match_indices("\nm=")
        .map(|(i, _)| start + i + 1)
        .next()
        .unwrap_or(sdp.len());
    Some((start, end))
}

/// Smallest unused extmap id in `[1, 14]` within the given m-section slice.
fn smallest_unused_extmap_id(section: &str) -> Option<u8> {
    let mut used: u16 = 0;
    for line in section.lines() {
        if let Some(rest) = line.strip_prefix("a=extmap:") {
            let id_str = rest.split_whitespace().next().unwrap_or("");
            let id_str = id_str.split('/').next().unwrap_or(id_str);
            if let Ok(id) = id_str.parse::<u8>() {
                if (1..=14).contains(&id) {
                    used |= 1 << id;
                }
            }
        }
    }
    (1..=MAX_EXTMAP_ID).find(|id| used & (1 << id) == 0)
}

fn find_opus_payload_type(sdp: &str) -> Option<u8> {
    for line in sdp.lines() {
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            let mut parts = rest.splitn(2, ' ');
            let pt = parts.next()?;
            let codec = parts.next()?;
            if codec.to_ascii_lowercase().starts_with("opus/") {
                return pt.parse::<u8>().ok();
            }
        }
    }
    None
}

/// Inject the RFC 6464 `ssrc-audio-level` header extension into the
/// publisher's generated offer, picking the smallest free extmap id in the
/// audio m-section and falling back to a no-op when none is free.
pub fn inject_audio_level_extension(sdp: &str) -> AudioLevelInjection {
    let Some((start, end)) = audio_section_bounds(sdp) else {
        return AudioLevelInjection {
            sdp: sdp.to_string(),
            extmap_id: None,
            opus_payload_type: find_opus_payload_type(sdp),
        };
    };
    let section = &sdp[start..end];

    let Some(extmap_id) = smallest_unused_extmap_id(section) else {
        return AudioLevelInjection {
            sdp: sdp.to_string(),
            extmap_id: None,
            opus_payload_type: find_opus_payload_type(sdp),
        };
    };

    let anchor_pos = INSERTION_ANCHORS
        .iter()
        .filter_map(|anchor| section.find(anchor).map(|i| start + i))
        .min();

    let Some(anchor_pos) = anchor_pos else {
        return AudioLevelInjection {
            sdp: sdp.to_string(),
            extmap_id: None,
            opus_payload_type: find_opus_payload_type(sdp),
        };
    };

    let mut new_sdp = String::with_capacity(sdp.len() + 64);
    new_sdp.push_str(&sdp[..anchor_pos]);
    new_sdp.push_str(&format!("a=extmap:{extmap_id} {AUDIO_LEVEL_URI}\r\n"));
    new_sdp.push_str(&sdp[anchor_pos..]);

    let opus_payload_type = find_opus_payload_type(&new_sdp);
    AudioLevelInjection {
        sdp: new_sdp,
        extmap_id: Some(extmap_id),
        opus_payload_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_offer(extmap_lines: &str) -> String {
        format!(
            "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\ns=-\r\nt=0 0\r\n\
             m=audio 9 UDP/TLS/RTP/SAVPF 111\r\nc=IN IP4 0.0.0.0\r\n\
             a=rtpmap:111 opus/48000/2\r\n{extmap_lines}a=sendrecv\r\n\
             m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 VP8/90000\r\n"
        )
    }

    #[test]
    fn injects_lowest_free_id_before_sendrecv() {
        let sdp = sample_offer("a=extmap:1 foo\r\na=extmap:2 bar\r\na=extmap:3 baz\r\n");
        let result = inject_audio_level_extension(&sdp);
        assert_eq!(result.extmap_id, Some(4));
        assert_eq!(result.opus_payload_type, Some(111));
        assert!(result
            .sdp
            .contains("a=extmap:4 urn:ietf:params:rtp-hdrext:ssrc-audio-level\r\n"));
        let extmap_pos = result.sdp.find("a=extmap:4").unwrap();
        let sendrecv_pos = result.sdp.find("a=sendrecv").unwrap();
        assert!(extmap_pos < sendrecv_pos);
    }

    #[test]
    fn skips_when_no_sendrecv_sendonly_recvonly() {
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=rtpmap:111 opus/48000/2\r\n";
        let result = inject_audio_level_extension(sdp);
        assert_eq!(result.extmap_id, None);
        assert_eq!(result.sdp, sdp);
        assert_eq!(result.opus_payload_type, Some(111));
    }

    #[test]
    fn skips_when_all_14_ids_used() {
        let mut extmaps = String::new();
        for id in 1..=14 {
            extmaps.push_str(&format!("a=extmap:{id} uri:{id}\r\n"));
        }
        let sdp = sample_offer(&extmaps);
        let result = inject_audio_level_extension(&sdp);
        assert_eq!(result.extmap_id, None);
        assert_eq!(result.sdp, sdp);
    }

    #[test]
    fn inserts_before_sendonly_when_present() {
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
                   a=rtpmap:111 opus/48000/2\r\na=sendonly\r\n\
                   m=video 9 UDP/TLS/RTP/SAVPF 96\r\n";
        let result = inject_audio_level_extension(sdp);
        assert_eq!(result.extmap_id, Some(1));
        let extmap_pos = result.sdp.find("a=extmap:1").unwrap();
        let sendonly_pos = result.sdp.find("a=sendonly").unwrap();
        assert!(extmap_pos < sendonly_pos);
    }

    #[test]
    fn audio_section_bounded_by_next_m_line() {
        // extmap ids inside the video section must not count against the
        // audio section's free-id scan.
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
                   a=rtpmap:111 opus/48000/2\r\na=sendrecv\r\n\
                   m=video 9 UDP/TLS/RTP/SAVPF 96\r\na=extmap:1 video-only\r\n";
        let result = inject_audio_level_extension(sdp);
        assert_eq!(result.extmap_id, Some(1));
    }
}
