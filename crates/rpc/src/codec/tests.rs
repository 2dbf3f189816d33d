use super::*;
use crate::Error;

fn frame(codec: &mut MsgpackCodec, bytes: &[u8]) -> Frame {
	match codec.decode(bytes).unwrap() {
		Decoded::Frame { consumed, frame } => {
			assert_eq!(consumed, bytes.len());
			frame
		}
		other => panic!("expected a frame, got {other:?}"),
	}
}

fn args(values: impl IntoIterator<Item = i64>) -> Vec<Value> {
	values.into_iter().map(Value::from).collect()
}

#[test]
fn every_strict_prefix_is_incomplete() {
	let mut codec = MsgpackCodec::new();
	let bytes = codec.encode_request(7, "nvim_eval", &[Value::from("3 + 3")]).unwrap();

	for end in 0..bytes.len() {
		match codec.decode(&bytes[..end]).unwrap() {
			Decoded::Incomplete { needed } => assert!(needed > end && needed <= bytes.len(), "prefix of {end} bytes"),
			other => panic!("prefix of {end} bytes decoded as {other:?}"),
		}
	}
	assert_eq!(
		codec.decode(&bytes).unwrap(),
		Decoded::Frame {
			consumed: bytes.len(),
			frame: Frame::Request {
				id: 7,
				method: "nvim_eval".into(),
				args: vec![Value::from("3 + 3")],
			},
		}
	);
}

#[test]
fn decodes_one_frame_and_reports_consumed_prefix() {
	let mut codec = MsgpackCodec::new();
	let mut bytes = codec.encode_notification("log", &[Value::from("hello")]).unwrap();
	let first_len = bytes.len();
	bytes.extend(codec.encode_response(3, Ok(&Value::from(6))).unwrap());

	assert_eq!(
		codec.decode(&bytes).unwrap(),
		Decoded::Frame {
			consumed: first_len,
			frame: Frame::Notification {
				method: "log".into(),
				args: vec![Value::from("hello")],
			},
		}
	);
	assert_eq!(
		codec.decode(&bytes[first_len..]).unwrap(),
		Decoded::Frame {
			consumed: bytes.len() - first_len,
			frame: Frame::Response {
				id: 3,
				outcome: Ok(Value::from(6)),
			},
		}
	);
}

#[test]
fn non_nil_error_slot_wins_over_result() {
	let mut codec = MsgpackCodec::new();
	let error = Value::Array(vec![Value::from(0), Value::from("Invalid method name")]);
	let bytes = codec.encode_response(9, Err(&error)).unwrap();

	assert_eq!(frame(&mut codec, &bytes), Frame::Response { id: 9, outcome: Err(error) });
}

#[test]
fn response_with_nil_result_is_success() {
	let mut codec = MsgpackCodec::new();
	let bytes = codec.encode_response(1, Ok(&Value::Nil)).unwrap();
	assert_eq!(frame(&mut codec, &bytes), Frame::Response { id: 1, outcome: Ok(Value::Nil) });
}

#[test]
fn rejects_frames_that_are_not_rpc_tuples() {
	let mut codec = MsgpackCodec::new();
	let cases: Vec<Vec<u8>> = vec![
		rmp_serde::to_vec(&"just a string").unwrap(),
		rmp_serde::to_vec(&(5u8, 1u32, "m", Vec::<i64>::new())).unwrap(),
		rmp_serde::to_vec(&(0u8, 1u32, "missing params")).unwrap(),
		rmp_serde::to_vec(&(2u8, 17u32, Vec::<i64>::new())).unwrap(),
		rmp_serde::to_vec(&(0u8, -1i64, "m", Vec::<i64>::new())).unwrap(),
		rmp_serde::to_vec(&(2u8, "m", 12u8)).unwrap(),
	];

	for bytes in cases {
		match codec.decode(&bytes).unwrap() {
			Decoded::Malformed { consumed, .. } => assert_eq!(consumed, bytes.len()),
			other => panic!("{bytes:?} decoded as {other:?}"),
		}
	}
}

#[test]
fn malformed_frame_does_not_hide_the_next_one() {
	let mut codec = MsgpackCodec::new();
	let mut bytes = rmp_serde::to_vec(&"junk").unwrap();
	let junk_len = bytes.len();
	bytes.extend(codec.encode_notification("log", &[]).unwrap());

	assert!(matches!(
		codec.decode(&bytes).unwrap(),
		Decoded::Malformed { consumed, .. } if consumed == junk_len
	));
	assert_eq!(
		frame(&mut codec, &bytes[junk_len..]),
		Frame::Notification {
			method: "log".into(),
			args: vec![],
		}
	);
}

#[test]
fn invalid_msgpack_is_a_decode_error() {
	let mut codec = MsgpackCodec::new();
	// 0xc1 is the one marker msgpack never assigns.
	assert!(matches!(codec.decode(&[0xc1]), Err(Error::Decode(_))));
}

#[test]
fn binary_method_names_are_accepted() {
	let mut codec = MsgpackCodec::new();
	let bytes = rmp_serde::to_vec(&(2u8, Value::Binary(b"redraw".to_vec()), args([1, 2]))).unwrap();
	assert_eq!(
		frame(&mut codec, &bytes),
		Frame::Notification {
			method: "redraw".into(),
			args: args([1, 2]),
		}
	);
}
