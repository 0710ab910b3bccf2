//! Synthetic ISOBMFF builders.

pub fn make_box(fourcc: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let size = (8 + body.len()) as u32;
    let mut out = Vec::with_capacity(size as usize);
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(fourcc);
    out.extend_from_slice(body);
    out
}

pub fn make_full_box(fourcc: &[u8; 4], version: u8, flags: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + payload.len());
    body.extend_from_slice(&(((version as u32) << 24) | (flags & 0x00ff_ffff)).to_be_bytes());
    body.extend_from_slice(payload);
    make_box(fourcc, &body)
}

pub fn concat(parts: &[&[u8]]) -> Vec<u8> {
    parts.iter().flat_map(|p| p.iter().copied()).collect()
}

pub fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

pub fn sidx_v0(timescale: u32, ept: u32, first_offset: u32, refs: &[(u32, u32)]) -> Vec<u8> {
    let mut payload = u32s(&[1, timescale, ept, first_offset]);
    payload.extend_from_slice(&0u16.to_be_bytes());
    payload.extend_from_slice(&(refs.len() as u16).to_be_bytes());
    for (size, duration) in refs {
        payload.extend(u32s(&[*size, *duration, 0x9000_0000]));
    }
    make_full_box(b"sidx", 0, 0, &payload)
}

pub fn emsg_v0(scheme: &str, value: &str, timescale: u32, delta: u32, id: u32, data: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(scheme.as_bytes());
    payload.push(0);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    payload.extend(u32s(&[timescale, delta, 0, id]));
    payload.extend_from_slice(data);
    make_full_box(b"emsg", 0, 0, &payload)
}

pub fn emsg_v1(scheme: &str, timescale: u32, presentation_time: u64, id: u32) -> Vec<u8> {
    let mut payload = u32s(&[timescale]);
    payload.extend_from_slice(&presentation_time.to_be_bytes());
    payload.extend(u32s(&[0, id]));
    payload.extend_from_slice(scheme.as_bytes());
    payload.push(0);
    payload.push(0);
    make_full_box(b"emsg", 1, 0, &payload)
}

pub fn tfdt_v1(base_media_decode_time: u64) -> Vec<u8> {
    make_full_box(b"tfdt", 1, 0, &base_media_decode_time.to_be_bytes())
}

pub fn moof(traf_children: &[&[u8]]) -> Vec<u8> {
    let mfhd = make_full_box(b"mfhd", 0, 0, &u32s(&[1]));
    let traf = make_box(b"traf", &concat(traf_children));
    make_box(b"moof", &concat(&[&mfhd, &traf]))
}

/// Length-prefixed NAL unit with a one byte payload.
pub fn nal(header: u8) -> Vec<u8> {
    let mut out = 2u32.to_be_bytes().to_vec();
    out.push(header);
    out.push(0x80);
    out
}

pub fn init_logger() {
    let _ = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Trace)
        .is_test(true)
        .try_init();
}
