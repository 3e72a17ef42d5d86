use crate::protocol::error::{Result, SealRpcError};
use crate::protocol::request::{CallBody, MessageKind, MethodBody, ObjectBody};
use crate::protocol::{Request, Response};

/// MessagePack codec for SealRPC messages.
///
/// Requests are framed as `[kind byte][body]` and bodies use named fields,
/// so a worker rejects an unknown kind without decoding anything else.
/// Responses are the bare envelope.
///
/// # Example
///
/// ```
/// use sealrpc_common::transport::MsgPackCodec;
/// use sealrpc_common::{MessageKind, Request, Value};
///
/// let request = Request::function_call("add", vec![Value::from(2), Value::from(3)]);
/// let frame = MsgPackCodec::encode_request(&request).unwrap();
/// assert_eq!(frame[0], MessageKind::FunctionCall.as_u8());
///
/// let decoded = MsgPackCodec::decode_request(&frame).unwrap();
/// assert_eq!(decoded, request);
/// ```
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a request to its wire frame.
    pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
        let body = match request {
            Request::FunctionCall {
                function_name: name,
                args,
                kwargs,
            }
            | Request::ConstructorCall {
                class_name: name,
                args,
                kwargs,
            } => rmp_serde::to_vec_named(&CallBody {
                name: name.clone(),
                args: args.clone(),
                kwargs: kwargs.clone(),
            })?,
            Request::MethodCall {
                object_id,
                method_name,
                args,
                kwargs,
            } => rmp_serde::to_vec_named(&MethodBody {
                object_id: object_id.clone(),
                method_name: method_name.clone(),
                args: args.clone(),
                kwargs: kwargs.clone(),
            })?,
            Request::AttributeQuery { object_id } | Request::Destructor { object_id } => {
                rmp_serde::to_vec_named(&ObjectBody {
                    object_id: object_id.clone(),
                })?
            }
        };

        let mut frame = Vec::with_capacity(body.len() + 1);
        frame.push(request.kind().as_u8());
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a request frame.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` for an empty frame or an unknown message kind
    /// - `Serialization` if the body does not match the kind's shape
    pub fn decode_request(frame: &[u8]) -> Result<Request> {
        let (&kind_byte, body) = frame
            .split_first()
            .ok_or_else(|| SealRpcError::InvalidRequest("empty request frame".to_string()))?;
        let kind = MessageKind::try_from(kind_byte)?;

        let request = match kind {
            MessageKind::FunctionCall => {
                let body: CallBody = rmp_serde::from_slice(body)?;
                Request::FunctionCall {
                    function_name: body.name,
                    args: body.args,
                    kwargs: body.kwargs,
                }
            }
            MessageKind::ConstructorCall => {
                let body: CallBody = rmp_serde::from_slice(body)?;
                Request::ConstructorCall {
                    class_name: body.name,
                    args: body.args,
                    kwargs: body.kwargs,
                }
            }
            MessageKind::MethodCall => {
                let body: MethodBody = rmp_serde::from_slice(body)?;
                Request::MethodCall {
                    object_id: body.object_id,
                    method_name: body.method_name,
                    args: body.args,
                    kwargs: body.kwargs,
                }
            }
            MessageKind::AttributeQuery => {
                let body: ObjectBody = rmp_serde::from_slice(body)?;
                Request::AttributeQuery {
                    object_id: body.object_id,
                }
            }
            MessageKind::Destructor => {
                let body: ObjectBody = rmp_serde::from_slice(body)?;
                Request::Destructor {
                    object_id: body.object_id,
                }
            }
        };

        Ok(request)
    }

    /// Encode a response envelope.
    pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(response)?)
    }

    /// Decode a response envelope.
    pub fn decode_response(data: &[u8]) -> Result<Response> {
        rmp_serde::from_slice(data)
            .map_err(|e| SealRpcError::InvalidResponse(format!("undecodable response: {}", e)))
    }
}
