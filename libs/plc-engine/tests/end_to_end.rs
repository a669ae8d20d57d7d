use std::time::Duration;

use plc_api::error::{CallError, ErrorKind};
use plc_api::message::{CallRequest, CallResponse};
use plc_api::schema::ReturnType;
use plc_api::value::{ArrayData, CompositeData, Scalar, SetOfData, WireType, WireValue};
use plc_engine::config::PlcConfig;
use plc_engine::dispatcher::{NeverCancelled, SessionDispatcher};

fn dispatcher() -> SessionDispatcher {
    SessionDispatcher::new(PlcConfig::default()).unwrap()
}

/// Tests run in parallel against one interpreter, so a shared session can
/// find it busy.
fn dispatch(req: &CallRequest) -> Result<CallResponse, CallError> {
    let dispatcher = dispatcher();
    loop {
        match dispatcher.dispatch(req, &NeverCancelled) {
            Err(e) if e.kind == ErrorKind::ResourceBusy => std::thread::sleep(Duration::from_millis(5)),
            other => return other,
        }
    }
}

fn call(req: &CallRequest) -> CallResponse {
    dispatch(req).unwrap()
}

fn int(i: i32) -> Option<Scalar> {
    Some(Scalar::Int(i))
}

fn two_by_two() -> SetOfData {
    SetOfData {
        column_names: vec!["a".into(), "b".into()],
        column_types: vec![WireType::Int, WireType::Int],
        rows: vec![vec![int(1), int(2)], vec![int(1), int(2)]],
    }
}

#[test]
fn literal_return() {
    let resp = call(&CallRequest::new("test", "return (1)").returns(ReturnType::scalar(WireType::Int)));
    assert!(resp.is_ok(), "{:?}", resp.exception);
    assert_eq!(resp.result(), Some(&WireValue::from(Scalar::Int(1))));
}

#[test]
fn named_argument_is_visible() {
    let req = CallRequest::new("test", "return (b)")
        .arg("b", Scalar::Int(100))
        .returns(ReturnType::scalar(WireType::Int));
    assert_eq!(call(&req).result(), Some(&WireValue::from(Scalar::Int(100))));
}

#[test]
fn positional_arguments_through_args() {
    let req = CallRequest::new("test", "args[0] + args[1]")
        .arg("", Scalar::Real(1.5))
        .arg("y", Scalar::Real(2.0))
        .returns(ReturnType::scalar(WireType::Real));
    assert_eq!(call(&req).result(), Some(&WireValue::from(Scalar::Real(3.5))));
}

#[test]
fn void_return_keeps_output() {
    let resp = call(&CallRequest::new("test", r#"print("side effect");"#));
    assert!(resp.is_ok());
    assert_eq!(resp.results, vec![WireValue::Void]);
    assert_eq!(resp.logs, "LOG: side effect\n");
}

#[test]
fn null_argument_is_unit() {
    let req = CallRequest::new("test", "is_null(b)")
        .arg("b", WireValue::null(WireType::Text))
        .returns(ReturnType::scalar(WireType::Logical));
    assert_eq!(call(&req).result(), Some(&WireValue::from(Scalar::Logical(true))));
}

#[test]
fn setof_argument_is_a_data_frame() {
    let req = CallRequest::new("test", "return (nrow(a))")
        .arg("a", two_by_two())
        .returns(ReturnType::scalar(WireType::Int));
    assert_eq!(call(&req).result(), Some(&WireValue::from(Scalar::Int(2))));

    let echo = CallRequest::new("test", "return (a)")
        .arg("a", two_by_two())
        .returns(ReturnType::setof([WireType::Int, WireType::Int]));
    assert_eq!(call(&echo).result(), Some(&WireValue::from(two_by_two())));
}

#[test]
fn matrix_result_as_set() {
    let req = CallRequest::new("test", "matrix([0, 1, 2, 3], 2, 2)")
        .returns(ReturnType::setof([WireType::Int, WireType::Int]));
    let resp = call(&req);
    let Some(WireValue::SetOf(set)) = resp.result() else {
        panic!("expected a set, got {resp:?}");
    };
    assert_eq!(set.rows, vec![vec![int(0), int(2)], vec![int(1), int(3)]]);
}

#[test]
fn array_in_and_out() {
    let arr = ArrayData {
        element_type: WireType::Int,
        values: vec![int(1), None, int(3)],
    };
    let sum = CallRequest::new("test", "a.sum()")
        .arg("a", arr.clone())
        .returns(ReturnType::scalar(WireType::Int));
    assert_eq!(call(&sum).result(), Some(&WireValue::from(Scalar::Int(4))));

    let doubled = CallRequest::new("test", "a.to_array().map(|x| if is_null(x) { () } else { x * 2 })")
        .arg("a", arr)
        .returns(ReturnType::array(WireType::Int));
    assert_eq!(
        call(&doubled).result(),
        Some(&WireValue::from(ArrayData {
            element_type: WireType::Int,
            values: vec![int(2), None, int(6)],
        }))
    );
}

#[test]
fn composite_round_trip() {
    let rec = CompositeData::default()
        .field("id", Scalar::Int(7))
        .field("name", Scalar::Text("seven".into()));
    let req = CallRequest::new("test", "rec")
        .arg("rec", rec.clone())
        .returns(ReturnType::composite([WireType::Int, WireType::Text]));
    assert_eq!(call(&req).result(), Some(&WireValue::from(rec)));
}

#[test]
fn bytea_carries_native_values_between_calls() {
    let make = CallRequest::new("make", r#"data_frame(["x"], [[1, 2, 3]])"#)
        .returns(ReturnType::scalar(WireType::Bytea));
    let resp = call(&make);
    let blob = resp.result().and_then(WireValue::as_scalar).cloned().unwrap();
    assert_eq!(blob.ty(), WireType::Bytea);

    let read = CallRequest::new("read", "nrow(df)")
        .arg("df", blob)
        .returns(ReturnType::scalar(WireType::Int));
    assert_eq!(call(&read).result(), Some(&WireValue::from(Scalar::Int(3))));
}

#[test]
fn misshapen_bytea_argument_is_rejected() {
    let mut bytes = b"PLC\x01".to_vec();
    bytes.extend_from_slice(
        br#"{"t":"frame","v":{"names":["a","b"],"columns":[{"class":"integer","cells":[1]}]}}"#,
    );
    let req = CallRequest::new("test", r#"x["b"]"#)
        .arg("x", Scalar::Bytea(bytes))
        .returns(ReturnType::scalar(WireType::Int));
    let resp = call(&req);
    let exception = resp.exception.expect("bad payload must be reported");
    assert!(exception.message.starts_with("argument error"), "{}", exception.message);
}

#[test]
fn oversized_matrix_is_an_evaluation_error() {
    let req = CallRequest::new("test", "let m = matrix([], 4294967296, 4294967296); nrow(m)")
        .returns(ReturnType::scalar(WireType::Int));
    let resp = call(&req);
    let exception = resp.exception.expect("bad shape must be reported");
    assert!(exception.message.starts_with("evaluation error"), "{}", exception.message);
}

#[test]
fn parse_error_is_reported_in_response() {
    let resp = call(&CallRequest::new("test", "return (").returns(ReturnType::scalar(WireType::Int)));
    let exception = resp.exception.expect("parse failure must be reported");
    assert!(exception.message.starts_with("parse error"), "{}", exception.message);
    assert!(resp.results.is_empty());
}

#[test]
fn evaluation_error_keeps_earlier_logs() {
    let req = CallRequest::new("test", r#"log_notice("step 1"); stop("bad input")"#);
    let resp = call(&req);
    assert_eq!(
        resp.exception.map(|e| e.message),
        Some("evaluation error: error executing test: bad input".to_string())
    );
    assert!(resp.logs.starts_with("NOTICE: step 1\n"), "{}", resp.logs);
}

#[test]
fn unconvertible_result_is_null_with_exception() {
    let resp = call(&CallRequest::new("test", r#""abc""#).returns(ReturnType::scalar(WireType::Int)));
    assert_eq!(resp.result(), Some(&WireValue::null(WireType::Int)));
    let exception = resp.exception.expect("mismatch must be reported");
    assert!(exception.message.starts_with("type mismatch error"), "{}", exception.message);
}

#[test]
fn bad_argument_names_are_argument_errors() {
    let req = CallRequest::new("test", "1")
        .arg("x", Scalar::Int(1))
        .arg("x", Scalar::Int(2));
    let resp = call(&req);
    assert!(resp.exception.unwrap().message.starts_with("argument error"));
}

#[test]
fn unmaterializable_return_type_fails_the_call() {
    let req = CallRequest::new("test", "1").returns(ReturnType::setof(Vec::new()));
    let err = dispatch(&req).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Unsupported);
}

#[test]
fn json_request_to_json_response() {
    let req: CallRequest = serde_json::from_str(
        r#"{
            "proc": {"name": "test", "src": "return (b + 1)"},
            "args": [{"name": "b", "type": "INT", "value": 41}],
            "rettype": {"type": "INT"}
        }"#,
    )
    .unwrap();
    let resp = call(&req);
    assert_eq!(
        serde_json::to_string(&resp).unwrap(),
        r#"{"results":[{"type":"INT","value":42}],"logs":""}"#
    );
}
