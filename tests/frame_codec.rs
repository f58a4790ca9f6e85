use chrono::DateTime;
use dongle_link::crc16;
use dongle_link::serial::protocol::{encode_binary, encode_text, validate_frame, MAX_PARAM_LEN};
use dongle_link::serial::{BinaryFrame, ByteCodes, InboundFrame, TextReply, TextReplyKind};
use dongle_link::{SerialError, Trace};

fn framed(start: u8, body: &[u8], end: u8) -> Vec<u8> {
    let mut frame = vec![start];
    frame.extend_from_slice(body);
    frame.extend_from_slice(&crc16(body).to_be_bytes());
    frame.push(end);
    frame
}

#[test]
fn test_encode_command_without_params() {
    let frame = encode_binary(&[0x01], &[]).unwrap();
    assert_eq!(frame, vec![0xF0, 0x00, 0x00, 0x01, 0x45, 0xD7, 0x0F]);
    assert_eq!(frame.len(), 7);
}

#[test]
fn test_encode_command_with_params() {
    let frame = encode_binary(&[0x10], &[0xAA, 0xBB]).unwrap();
    assert_eq!(frame, vec![0xF0, 0x02, 0x00, 0x10, 0xAA, 0xBB, 0xBD, 0x05, 0x0F]);
}

#[test]
fn test_reboot_bypasses_framing() {
    assert_eq!(encode_binary(&[ByteCodes::REBOOT], &[]).unwrap(), vec![0x03, 0x04]);
    // Parameters never make it into a reboot
    assert_eq!(encode_binary(&[ByteCodes::REBOOT], &[0x01, 0x02]).unwrap(), vec![0x03, 0x04]);
    assert_eq!(Trace::reboot().encode().unwrap(), vec![0x03, 0x04]);
}

#[test]
fn test_encoded_frames_validate() {
    let params: [&[u8]; 4] = [&[], &[0x00], &[0x3B, 0x3B], &[0xFF; 300]];
    for code in (0x00u8..=0x20).filter(|c| *c != ByteCodes::REBOOT) {
        for p in params {
            let frame = encode_binary(&[code], p).unwrap();
            assert!(validate_frame(&frame), "frame for {:#04x} with {} params rejected", code, p.len());
        }
    }
}

#[test]
fn test_single_bit_errors_rejected() {
    let frame = encode_binary(&[0x10], &[0xAA, 0xBB]).unwrap();
    for index in 0..frame.len() {
        for bit in 0..8 {
            let mut corrupted = frame.clone();
            corrupted[index] ^= 1 << bit;
            assert!(!validate_frame(&corrupted), "flip of bit {} in byte {} accepted", bit, index);
        }
    }
}

#[test]
fn test_device_frame_markers() {
    let frame = framed(ByteCodes::SOF_R, &[0x00, 0x00, 0x01], ByteCodes::EOF_R);
    assert!(validate_frame(&frame));

    // Markers must come from the same direction
    let mixed = framed(ByteCodes::SOF_R, &[0x00, 0x00, 0x01], ByteCodes::EOF);
    assert!(!validate_frame(&mixed));
}

#[test]
fn test_short_buffers_rejected() {
    assert!(!validate_frame(&[]));
    assert!(!validate_frame(&[ByteCodes::SOF_R]));
    assert!(!validate_frame(&[ByteCodes::SOF_R, ByteCodes::EOF_R]));
    // Empty body: checksum of nothing is 0x0000
    assert!(validate_frame(&[ByteCodes::SOF_R, 0x00, 0x00, ByteCodes::EOF_R]));
}

#[test]
fn test_decode_binary_frame() {
    let frame = BinaryFrame::decode(&encode_binary(&[0x10], &[0xAA, 0xBB]).unwrap()).unwrap();
    assert_eq!(frame.start, ByteCodes::SOF);
    assert_eq!(frame.command_code, vec![0x10]);
    assert_eq!(frame.params, vec![0xAA, 0xBB]);
    assert_eq!(frame.checksum, 0xBD05);

    let reply = BinaryFrame::decode(&framed(ByteCodes::SOF_R, &[0x01, 0x00, 0x20, 0x21, 0x7F], ByteCodes::EOF_R)).unwrap();
    assert_eq!(reply.command_code, vec![0x20, 0x21]);
    assert_eq!(reply.params, vec![0x7F]);
    assert_eq!(reply.encode().unwrap(), framed(ByteCodes::SOF_R, &[0x01, 0x00, 0x20, 0x21, 0x7F], ByteCodes::EOF_R));
}

#[test]
fn test_decode_rejects_bad_length() {
    let frame = framed(ByteCodes::SOF_R, &[0x05, 0x00, 0x10], ByteCodes::EOF_R);
    assert!(validate_frame(&frame));
    assert!(BinaryFrame::decode(&frame).is_err());

    let mut corrupted = encode_binary(&[0x01], &[]).unwrap();
    corrupted[4] ^= 0xFF;
    assert!(BinaryFrame::decode(&corrupted).is_err());
}

#[test]
fn test_text_frame_validation() {
    assert!(validate_frame(b"DLR;1;STATUS;OK;1700000000;EOR"));
    assert!(validate_frame(b"DLM;1;Ready;1700000000;EOM"));
    assert!(validate_frame(b"DLR;1;STATUS;OK;1700000000;EOR\r\n"));

    // Opening and closing tags are not required to pair up
    assert!(validate_frame(b"DLR;1;STATUS;OK;1700000000;EOM"));
    assert!(validate_frame(b"DLM;1;Ready;1700000000;EOR"));

    assert!(!validate_frame(b"DLC;1;STATUS;OK;1700000000;EOR"));
    assert!(!validate_frame(b"DLR;1;STATUS;OK;1700000000"));
    assert!(!validate_frame(b"hello;world"));
    assert!(!validate_frame(b"DLR;EOR;extra"));
}

#[test]
fn test_encode_text_frame() {
    let ts = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    assert_eq!(encode_text("SEND", "a;b", ts), b"DLC;2;SEND;a;b;1700000000".to_vec());
    assert_eq!(encode_text("PING", "", ts), b"DLC;1;PING;;1700000000".to_vec());

    let trace = Trace::text("FREQ", "868.1").with_timestamp(ts);
    assert_eq!(trace.encode().unwrap(), b"DLC;1;FREQ;868.1;1700000000".to_vec());
}

#[test]
fn test_classify_inbound() {
    let valid = b"DLR;1;STATUS;OK;1700000000;EOR".to_vec();
    assert_eq!(InboundFrame::classify(valid.clone()), InboundFrame::Valid(valid));

    let banner = b"LoRa modem ready\r\n".to_vec();
    assert_eq!(InboundFrame::classify(banner.clone()), InboundFrame::SystemMessage(banner));

    let overflow = b"RX Buffer Overflow\r\n".to_vec();
    assert_eq!(InboundFrame::classify(overflow.clone()), InboundFrame::Overflow(overflow));

    let mut corrupted = encode_binary(&[0x01], &[]).unwrap();
    corrupted[3] ^= 0x01;
    assert_eq!(InboundFrame::classify(corrupted.clone()), InboundFrame::SystemMessage(corrupted));
}

#[test]
fn test_parse_text_reply() {
    let reply = TextReply::parse(b"DLR;2;SET;10;20;1700000000.5;EOR").unwrap();
    assert_eq!(reply.kind, TextReplyKind::Response);
    assert_eq!(reply.param_count, 2);
    assert_eq!(reply.command, "SET");
    assert_eq!(reply.params, vec!["10".to_string(), "20".to_string()]);
    assert_eq!(reply.timestamp.timestamp_millis(), 1_700_000_000_500);

    let message = TextReply::parse(b"DLM;1;Satellite in view;1700000000;EOM\r\n").unwrap();
    assert_eq!(message.kind, TextReplyKind::Message);
    assert_eq!(message.command, "Satellite in view");
    assert!(message.params.is_empty());
}

#[test]
fn test_parse_text_reply_errors() {
    assert!(TextReply::parse(b"DLR;x;SET;1700000000;EOR").is_err());
    assert!(TextReply::parse(b"DLR;1;SET;yesterday;EOR").is_err());
    assert!(TextReply::parse(b"DLR;1;EOR").is_err());
    assert!(TextReply::parse(&encode_binary(&[0x01], &[]).unwrap()).is_err());
}

#[test]
fn test_ack() {
    assert!(ByteCodes::is_ack(&[0xF1, 0x00, 0x00, 0x00, 0x1F]));
    assert!(!ByteCodes::is_ack(&encode_binary(&[0x01], &[]).unwrap()));
}

#[test]
fn test_oversized_params_rejected() {
    let largest = encode_binary(&[0x01], &vec![0x55; MAX_PARAM_LEN]).unwrap();
    assert_eq!(&largest[1..3], &[0xFF, 0xFF]);
    assert_eq!(BinaryFrame::decode(&largest).unwrap().params.len(), MAX_PARAM_LEN);

    for len in [MAX_PARAM_LEN + 1, MAX_PARAM_LEN + 3] {
        match encode_binary(&[0x01], &vec![0x55; len]) {
            Err(SerialError::ProtocolError(detail)) => assert!(detail.contains(&len.to_string()), "{}", detail),
            other => panic!("{} parameter bytes encoded: {:?}", len, other.map(|f| f.len())),
        }
    }

    let trace = Trace::binary("BULK", vec![0x30], vec![0u8; MAX_PARAM_LEN + 1]);
    assert!(trace.encode().is_err());
}

#[test]
fn test_parse_fractional_timestamps() {
    let before_epoch = TextReply::parse(b"DLM;1;Clock unset;-1.5;EOM").unwrap();
    assert_eq!(before_epoch.timestamp.timestamp_millis(), -1_500);

    let rounded = TextReply::parse(b"DLR;0;PING;1700000000.2504;EOR").unwrap();
    assert_eq!(rounded.timestamp.timestamp_millis(), 1_700_000_000_250);

    assert!(TextReply::parse(b"DLR;0;PING;inf;EOR").is_err());
    assert!(TextReply::parse(b"DLR;0;PING;NaN;EOR").is_err());
}
