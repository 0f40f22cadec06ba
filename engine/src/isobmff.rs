//! ISOBMFF (MP4) box parsing utilities, centralizing the boilerplate for
//! traversing MP4 structures in memory. Ported from
//! `hls-vod-lib::segment::isobmff`, used here to patch `trex` default
//! sample durations on freshly-muxed init segments.

/// Walk all top-level boxes in a buffer, and recursively traverse specified
/// container boxes. `callback` is invoked for every box in pre-order
/// traversal with `(box_type, payload)`.
pub fn walk_boxes<'a, F>(data: &'a [u8], containers: &[&[u8; 4]], callback: &mut F)
where
    F: FnMut(&[u8; 4], &'a [u8]),
{
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let size =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        if size < 8 || pos + size > data.len() {
            break;
        }
        let btype: &[u8; 4] = &data[pos + 4..pos + 8].try_into().unwrap();
        let payload = &data[pos + 8..pos + size];

        callback(btype, payload);

        if containers.contains(&btype) {
            walk_boxes(payload, containers, callback);
        }

        pos += size;
    }
}

/// Mutable version of `walk_boxes`.
pub fn walk_boxes_mut<F>(data: &mut [u8], containers: &[&[u8; 4]], callback: &mut F)
where
    F: FnMut(&[u8; 4], &mut [u8]),
{
    let mut pos = 0;
    let len = data.len();
    while pos + 8 <= len {
        let size =
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize;
        if size < 8 || pos + size > len {
            break;
        }
        let btype: [u8; 4] = data[pos + 4..pos + 8].try_into().unwrap();

        let payload = &mut data[pos + 8..pos + size];
        callback(&btype, payload);

        if containers.contains(&&btype) {
            walk_boxes_mut(payload, containers, callback);
        }

        pos += size;
    }
}

/// Patch every `trex` box's `default_sample_duration` field (offset 20 from
/// the box payload start, per ISO/IEC 14496-12) to `duration_ticks`.
///
/// `empty_moov` muxing leaves this at whatever the muxer guessed; the
/// segmenter knows the real per-kind sample cadence once the first sample
/// lands, so it overwrites it here to keep HLS clients' duration math exact.
pub fn fix_trex_durations(data: &mut [u8], duration_ticks: u32) {
    let containers: &[&[u8; 4]] = &[b"moov", b"mvex"];
    walk_boxes_mut(data, containers, &mut |box_type, payload| {
        if box_type == b"trex" && payload.len() >= 24 {
            let bytes = duration_ticks.to_be_bytes();
            payload[20..24].copy_from_slice(&bytes);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(box_type: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let size = (8 + payload.len()) as u32;
        let mut out = Vec::with_capacity(size as usize);
        out.extend_from_slice(&size.to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn walk_boxes_visits_top_level_and_nested() {
        let trex = make_box(b"trex", &[0u8; 24]);
        let mvex = make_box(b"mvex", &trex);
        let moov = make_box(b"moov", &mvex);

        let mut seen = Vec::new();
        walk_boxes(&moov, &[b"moov", b"mvex"], &mut |bt, _| {
            seen.push(*bt);
        });

        assert_eq!(seen, vec![*b"mvex", *b"trex"]);
    }

    #[test]
    fn fix_trex_durations_overwrites_default_sample_duration() {
        let trex = make_box(b"trex", &[0u8; 24]);
        let mvex = make_box(b"mvex", &trex);
        let mut moov = make_box(b"moov", &mvex);

        fix_trex_durations(&mut moov, 3000);

        let mut found = None;
        walk_boxes(&moov, &[b"moov", b"mvex"], &mut |bt, payload| {
            if bt == b"trex" {
                found = Some(u32::from_be_bytes(payload[20..24].try_into().unwrap()));
            }
        });
        assert_eq!(found, Some(3000));
    }
}
