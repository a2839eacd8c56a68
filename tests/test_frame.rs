use bytes::BytesMut;
use wirelink::websocket::frame::{FrameError, MAX_CONTROL_PAYLOAD, Opcode, WebFrame, apply_mask};

/// Feed `wire` in pieces of `step` bytes, returning the finished frame.
fn feed(wire: &[u8], step: usize, max_size: usize) -> Result<WebFrame, FrameError> {
    let mut frame = WebFrame::new(max_size);
    let mut carry = Vec::new();
    for piece in wire.chunks(step) {
        carry.extend_from_slice(piece);
        loop {
            let n = frame.deserialize(&carry)?;
            carry.drain(..n);
            if n == 0 || carry.is_empty() || frame.is_complete() {
                break;
            }
        }
    }
    assert!(carry.is_empty(), "unconsumed bytes after frame");
    Ok(frame)
}

#[test]
fn test_masked_payloads_survive_any_split() {
    let mask = [0x37, 0xfa, 0x21, 0x3d];
    for len in [0usize, 1, 3, 4, 5, 125, 126, 127, 300, 70_000] {
        let payload: Vec<u8> = (0..len).map(|i| (i * 7 % 256) as u8).collect();
        let mut wire = BytesMut::new();
        WebFrame::binary(&payload).serialize(&mut wire, Some(mask));

        for step in [1, 2, 3, 5, 4096] {
            let frame = feed(&wire, step, usize::MAX).unwrap();
            assert!(frame.is_complete());
            assert_eq!(frame.opcode(), Opcode::Binary);
            assert_eq!(frame.payload(), &payload[..], "len {} step {}", len, step);
            assert_eq!(frame.buffer_len() % 4, 0);
        }
    }
}

#[test]
fn test_client_frames_unmask_for_every_length_and_rotation() {
    let key = [0x0f, 0x5a, 0xc3, 0x96];
    for len in 0..=300usize {
        let payload: Vec<u8> = (0..len).map(|i| (i * 31 + 11) as u8).collect();
        for rotation in 0..4 {
            let mask = [
                key[rotation],
                key[(rotation + 1) % 4],
                key[(rotation + 2) % 4],
                key[(rotation + 3) % 4],
            ];
            let mut wire = BytesMut::new();
            WebFrame::binary(&payload).serialize(&mut wire, Some(mask));

            // Split so the payload starts at each offset within the mask.
            let frame = feed(&wire, rotation + 1, usize::MAX).unwrap();
            assert!(frame.is_complete());
            assert_eq!(frame.payload(), &payload[..], "len {} rotation {}", len, rotation);
        }
    }
}

#[test]
fn test_mask_at_every_alignment() {
    let mask = [0xa1, 0xb2, 0xc3, 0xd4];
    let original: Vec<u8> = (0..37).collect();
    let mut whole = original.clone();
    apply_mask(&mut whole, mask, 0);

    for offset in 0..4 {
        let mut split = original.clone();
        let (head, tail) = split.split_at_mut(offset);
        apply_mask(head, mask, 0);
        apply_mask(tail, mask, offset);
        assert_eq!(split, whole);
    }

    apply_mask(&mut whole, mask, 0);
    assert_eq!(whole, original);
}

#[test]
fn test_length_encodings() {
    let mut short = BytesMut::new();
    assert_eq!(WebFrame::binary(&[0; 125]).serialize(&mut short, None), 2 + 125);
    assert_eq!(short[1], 125);

    let mut medium = BytesMut::new();
    assert_eq!(WebFrame::binary(&[0; 126]).serialize(&mut medium, None), 4 + 126);
    assert_eq!(medium[1], 126);
    assert_eq!(&medium[2..4], &126u16.to_be_bytes());

    let mut long = BytesMut::new();
    assert_eq!(WebFrame::binary(&[0; 65_536]).serialize(&mut long, None), 10 + 65_536);
    assert_eq!(long[1], 127);
    assert_eq!(&long[2..10], &65_536u64.to_be_bytes());

    let mut masked = BytesMut::new();
    WebFrame::text("hi").serialize(&mut masked, Some([1, 2, 3, 4]));
    assert_eq!(masked[0], 0x81);
    assert_eq!(masked[1], 0x80 | 2);
    assert_eq!(&masked[2..6], &[1, 2, 3, 4]);
}

#[test]
fn test_text_buffer_keeps_spare_byte() {
    let frame = WebFrame::text("abcd");
    assert_eq!(frame.len(), 4);
    assert_eq!(frame.buffer_len(), 8);

    let binary = WebFrame::binary(b"abcd");
    assert_eq!(binary.buffer_len(), 4);
}

#[test]
fn test_fragments_reassemble() {
    let wire = [
        0x01, 0x03, b'H', b'e', b'l', // text, FIN clear
        0x00, 0x01, b'l', // continuation
        0x80, 0x01, b'o', // final continuation
    ];
    let mut frame = WebFrame::default();
    let mut offset = 0;
    while !frame.is_complete() {
        let n = frame.deserialize(&wire[offset..]).unwrap();
        assert!(n > 0);
        offset += n;
        if !frame.is_complete() {
            assert!(frame.in_progress());
            assert!(frame.at_boundary());
        }
    }

    assert_eq!(offset, wire.len());
    assert_eq!(frame.opcode(), Opcode::Text);
    assert!(frame.is_fin());
    assert_eq!(frame.as_text(), Some("Hello"));
}

#[test]
fn test_continuation_rules() {
    let mut frame = WebFrame::default();
    assert_eq!(
        frame.deserialize(&[0x80, 0x00]),
        Err(FrameError::UnexpectedContinuation)
    );

    let mut frame = WebFrame::default();
    frame.deserialize(&[0x01, 0x01, b'a']).unwrap();
    assert_eq!(
        frame.deserialize(&[0x82, 0x01, b'b']),
        Err(FrameError::ExpectedContinuation(Opcode::Binary))
    );
}

#[test]
fn test_header_violations() {
    let mut frame = WebFrame::default();
    assert_eq!(frame.deserialize(&[0xC1, 0x00]), Err(FrameError::ReservedBits));

    let mut frame = WebFrame::default();
    assert_eq!(frame.deserialize(&[0x83, 0x00]), Err(FrameError::UnknownOpcode(3)));

    let mut frame = WebFrame::new(4);
    assert_eq!(
        frame.deserialize(&[0x82, 0x05, 1, 2, 3, 4, 5]),
        Err(FrameError::TooLarge { len: 5, max: 4 })
    );
}

#[test]
fn test_fragmented_size_limit_counts_all_fragments() {
    let mut frame = WebFrame::new(4);
    assert_eq!(frame.deserialize(&[0x02, 0x03, 1, 2, 3]), Ok(5));
    assert_eq!(
        frame.deserialize(&[0x80, 0x02, 4, 5]),
        Err(FrameError::TooLarge { len: 5, max: 4 })
    );
}

#[test]
fn test_control_constructors_are_capped() {
    let long = [0u8; 300];
    assert_eq!(WebFrame::ping(&long).len(), MAX_CONTROL_PAYLOAD);
    assert_eq!(WebFrame::pong(&long).len(), MAX_CONTROL_PAYLOAD);

    let reason = "x".repeat(300);
    let close = WebFrame::close(Some(1001), &reason);
    assert_eq!(close.len(), MAX_CONTROL_PAYLOAD);
    assert_eq!(close.close_code(), Some(1001));

    assert_eq!(WebFrame::close(None, "ignored").len(), 0);
    assert_eq!(WebFrame::close(None, "").close_code(), None);
}

#[test]
fn test_take_leaves_fresh_frame() {
    let mut frame = WebFrame::new(1024);
    frame.deserialize(&[0x82, 0x02, 9, 9]).unwrap();
    assert!(frame.is_complete());

    let done = frame.take();
    assert_eq!(done.payload(), &[9, 9]);
    assert!(!frame.is_complete());
    assert!(!frame.in_progress());
    assert!(frame.is_empty());

    frame.deserialize(&[0x81, 0x01, b'z']).unwrap();
    assert_eq!(frame.as_text(), Some("z"));
}
