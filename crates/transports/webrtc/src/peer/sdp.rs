//! Remote media inspection from SDP

use peercall_core::media::MediaKind;
use peercall_core::peer::{RemoteMedia, RemoteTrack};
use peercall_core::{Error, Result};
use std::io::Cursor;
use webrtc::sdp::description::session::SessionDescription as SdpDescription;

/// Tracks the remote side announces it will send
///
/// Rejected sections (port 0) and sections marked `recvonly` or `inactive`
/// are skipped. Track ids come from `a=msid`, falling back to the `mid`.
pub fn remote_media_from_sdp(sdp: &str) -> Result<RemoteMedia> {
    let mut reader = Cursor::new(sdp.as_bytes());
    let parsed = SdpDescription::unmarshal(&mut reader)
        .map_err(|e| Error::SdpError(format!("Failed to parse remote description: {}", e)))?;

    let mut media = RemoteMedia::default();
    for (index, section) in parsed.media_descriptions.iter().enumerate() {
        let kind = match section.media_name.media.as_str() {
            "audio" => MediaKind::Audio,
            "video" => MediaKind::Video,
            _ => continue,
        };
        if section.media_name.port.value == 0 {
            continue;
        }

        let mut sends = true;
        let mut track_id = None;
        let mut mid = None;
        for attribute in &section.attributes {
            match attribute.key.as_str() {
                "recvonly" | "inactive" => sends = false,
                "mid" => mid = attribute.value.clone(),
                "msid" => {
                    let Some(value) = &attribute.value else {
                        continue;
                    };
                    let mut parts = value.split_whitespace();
                    if let Some(stream) = parts.next() {
                        if media.stream_id.is_empty() && stream != "-" {
                            media.stream_id = stream.to_string();
                        }
                    }
                    track_id = parts.next().map(str::to_string);
                }
                _ => {}
            }
        }

        if !sends {
            continue;
        }
        let id = track_id
            .or(mid)
            .unwrap_or_else(|| format!("{}-{}", kind, index));
        media.add_track(RemoteTrack { id, kind });
    }

    Ok(media)
}
