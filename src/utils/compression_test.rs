use crate::utils::compression::*;

#[test]
fn compressed_json_decodes_back() {
    let json = r#"{"a":{"value":"1","data":{"b":{"value":"\"x y\""}}}}"#;
    let encoded = compress_and_encode(json).unwrap();

    assert!(!encoded.contains('\n'));
    assert!(!encoded.contains(' '));
    assert_eq!(decode_and_decompress(&encoded).unwrap(), json);
}

#[test]
fn invalid_base64_is_a_decode_error() {
    assert!(decode_and_decompress("***not base64***").is_err());
}

#[test]
fn binary_bytes_roundtrip_through_base64() {
    let frame = vec![0u8, 255, 10, 13, 92];
    assert_eq!(decode_bytes(&encode_bytes(&frame)).unwrap(), frame);
}
