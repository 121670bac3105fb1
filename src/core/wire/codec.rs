// src/core/wire/codec.rs

use super::frame::MasterFrame;
use crate::core::errors::MasterError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length-prefixed, little-endian binary framing for [`MasterFrame`], the
/// same shape as the teacher's RESP codec: fixed-width integers first,
/// length-prefixed strings/blobs, replies beginning with a 4-byte error
/// code (`0` for success).
#[derive(Debug, Default)]
pub struct MasterFrameCodec;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn put_str(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

fn put_bytes(buf: &mut BytesMut, b: &[u8]) {
    buf.put_u32_le(b.len() as u32);
    buf.put_slice(b);
}

fn get_str(src: &mut Bytes) -> Result<String, MasterError> {
    if src.remaining() < 4 {
        return Err(MasterError::Protocol("truncated string length".into()));
    }
    let len = src.get_u32_le() as usize;
    if src.remaining() < len {
        return Err(MasterError::Protocol("truncated string body".into()));
    }
    let raw = src.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|e| MasterError::Protocol(e.to_string()))
}

fn get_bytes(src: &mut Bytes) -> Result<Bytes, MasterError> {
    if src.remaining() < 4 {
        return Err(MasterError::Protocol("truncated bytes length".into()));
    }
    let len = src.get_u32_le() as usize;
    if src.remaining() < len {
        return Err(MasterError::Protocol("truncated bytes body".into()));
    }
    Ok(src.copy_to_bytes(len))
}

impl Encoder<MasterFrame> for MasterFrameCodec {
    type Error = MasterError;

    fn encode(&mut self, item: MasterFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let mut body = BytesMut::new();
        body.put_u8(item.tag());
        match &item {
            MasterFrame::Status | MasterFrame::SystemStatus | MasterFrame::Ok => {}
            MasterFrame::Compact { table, row, flags } => {
                put_str(&mut body, table);
                body.put_u8(row.is_some() as u8);
                if let Some(r) = row {
                    put_str(&mut body, r);
                }
                body.put_u32_le(*flags);
            }
            MasterFrame::CreateTable { name, schema } | MasterFrame::AlterTable { name, schema } => {
                put_str(&mut body, name);
                put_bytes(&mut body, schema);
            }
            MasterFrame::DropTable { name } => put_str(&mut body, name),
            MasterFrame::RenameTable { name, new_name } => {
                put_str(&mut body, name);
                put_str(&mut body, new_name);
            }
            MasterFrame::RegisterServer {
                proxy,
                listen_port,
                system_stats,
                client_timestamp_us,
            } => {
                body.put_u8(proxy.is_some() as u8);
                if let Some(p) = proxy {
                    put_str(&mut body, p);
                }
                body.put_u16_le(*listen_port);
                put_bytes(&mut body, system_stats);
                body.put_i64_le(*client_timestamp_us);
            }
            MasterFrame::MoveRange {
                source,
                table,
                range_spec,
                range_id,
            } => {
                put_str(&mut body, source);
                put_str(&mut body, table);
                put_bytes(&mut body, range_spec);
                body.put_u64_le(*range_id);
            }
            MasterFrame::RelinquishAcknowledge {
                source,
                range_id,
                table,
                range_spec,
            } => {
                put_str(&mut body, source);
                body.put_u64_le(*range_id);
                put_str(&mut body, table);
                put_bytes(&mut body, range_spec);
            }
            MasterFrame::Balance { algorithm, args } => {
                put_str(&mut body, algorithm);
                body.put_u32_le(args.len() as u32);
                for a in args {
                    put_str(&mut body, a);
                }
            }
            MasterFrame::SetState { vars } => {
                body.put_u32_le(vars.len() as u32);
                for (code, value) in vars {
                    body.put_u16_le(*code);
                    body.put_i64_le(*value);
                }
            }
            MasterFrame::Stop { proxy, recover } => {
                put_str(&mut body, proxy);
                body.put_u8(*recover as u8);
            }
            MasterFrame::Shutdown { recover } => body.put_u8(*recover as u8),
            MasterFrame::CreateNamespace { path, flags }
            | MasterFrame::DropNamespace { path, flags } => {
                put_str(&mut body, path);
                body.put_u32_le(*flags);
            }
            MasterFrame::RecreateIndexTables { table, parts_mask } => {
                put_str(&mut body, table);
                body.put_u32_le(*parts_mask);
            }
            MasterFrame::FetchResult { operation_id } => body.put_u64_le(*operation_id),
            MasterFrame::ReplayStatus {
                operation_id,
                proxy,
                plan_generation,
                error,
            }
            | MasterFrame::ReplayComplete {
                operation_id,
                proxy,
                plan_generation,
                error,
            }
            | MasterFrame::PhantomPrepareComplete {
                operation_id,
                proxy,
                plan_generation,
                error,
            }
            | MasterFrame::PhantomCommitComplete {
                operation_id,
                proxy,
                plan_generation,
                error,
            } => {
                body.put_u64_le(*operation_id);
                put_str(&mut body, proxy);
                body.put_u64_le(*plan_generation);
                body.put_u32_le(*error);
            }
            MasterFrame::Error { code, message } => {
                body.put_u32_le(*code);
                put_str(&mut body, message);
            }
            MasterFrame::OperationId { operation_id } => body.put_u64_le(*operation_id),
            MasterFrame::Result {
                operation_id,
                payload,
            } => {
                body.put_u64_le(*operation_id);
                put_bytes(&mut body, payload);
            }
        }

        if body.len() > MAX_FRAME_LEN {
            return Err(MasterError::Protocol("frame too large".into()));
        }
        dst.put_u32_le(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

impl Decoder for MasterFrameCodec {
    type Item = MasterFrame;
    type Error = MasterError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_le_bytes(src[0..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(MasterError::Protocol("frame too large".into()));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }
        src.advance(4);
        let mut body = src.split_to(len).freeze();
        if body.is_empty() {
            return Err(MasterError::Protocol("empty frame body".into()));
        }
        let tag = body.get_u8();
        let frame = match tag {
            1 => MasterFrame::Status,
            2 => MasterFrame::SystemStatus,
            3 => MasterFrame::Compact {
                table: get_str(&mut body)?,
                row: if body.get_u8() != 0 {
                    Some(get_str(&mut body)?)
                } else {
                    None
                },
                flags: body.get_u32_le(),
            },
            4 => MasterFrame::CreateTable {
                name: get_str(&mut body)?,
                schema: get_bytes(&mut body)?,
            },
            5 => MasterFrame::DropTable {
                name: get_str(&mut body)?,
            },
            6 => MasterFrame::AlterTable {
                name: get_str(&mut body)?,
                schema: get_bytes(&mut body)?,
            },
            7 => MasterFrame::RenameTable {
                name: get_str(&mut body)?,
                new_name: get_str(&mut body)?,
            },
            8 => MasterFrame::RegisterServer {
                proxy: if body.get_u8() != 0 {
                    Some(get_str(&mut body)?)
                } else {
                    None
                },
                listen_port: body.get_u16_le(),
                system_stats: get_bytes(&mut body)?,
                client_timestamp_us: body.get_i64_le(),
            },
            9 => MasterFrame::MoveRange {
                source: get_str(&mut body)?,
                table: get_str(&mut body)?,
                range_spec: get_bytes(&mut body)?,
                range_id: body.get_u64_le(),
            },
            10 => MasterFrame::RelinquishAcknowledge {
                source: get_str(&mut body)?,
                range_id: body.get_u64_le(),
                table: get_str(&mut body)?,
                range_spec: get_bytes(&mut body)?,
            },
            11 => {
                let algorithm = get_str(&mut body)?;
                let n = body.get_u32_le();
                let mut args = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    args.push(get_str(&mut body)?);
                }
                MasterFrame::Balance { algorithm, args }
            }
            12 => {
                let n = body.get_u32_le();
                let mut vars = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    let code = body.get_u16_le();
                    let value = body.get_i64_le();
                    vars.push((code, value));
                }
                MasterFrame::SetState { vars }
            }
            13 => MasterFrame::Stop {
                proxy: get_str(&mut body)?,
                recover: body.get_u8() != 0,
            },
            14 => MasterFrame::Shutdown {
                recover: body.get_u8() != 0,
            },
            15 => MasterFrame::CreateNamespace {
                path: get_str(&mut body)?,
                flags: body.get_u32_le(),
            },
            16 => MasterFrame::DropNamespace {
                path: get_str(&mut body)?,
                flags: body.get_u32_le(),
            },
            17 => MasterFrame::RecreateIndexTables {
                table: get_str(&mut body)?,
                parts_mask: body.get_u32_le(),
            },
            18 => MasterFrame::FetchResult {
                operation_id: body.get_u64_le(),
            },
            19 | 20 | 21 | 22 => {
                let operation_id = body.get_u64_le();
                let proxy = get_str(&mut body)?;
                let plan_generation = body.get_u64_le();
                let error = body.get_u32_le();
                match tag {
                    19 => MasterFrame::ReplayStatus {
                        operation_id,
                        proxy,
                        plan_generation,
                        error,
                    },
                    20 => MasterFrame::ReplayComplete {
                        operation_id,
                        proxy,
                        plan_generation,
                        error,
                    },
                    21 => MasterFrame::PhantomPrepareComplete {
                        operation_id,
                        proxy,
                        plan_generation,
                        error,
                    },
                    _ => MasterFrame::PhantomCommitComplete {
                        operation_id,
                        proxy,
                        plan_generation,
                        error,
                    },
                }
            }
            100 => MasterFrame::Ok,
            101 => MasterFrame::Error {
                code: body.get_u32_le(),
                message: get_str(&mut body)?,
            },
            102 => MasterFrame::OperationId {
                operation_id: body.get_u64_le(),
            },
            105 => MasterFrame::Result {
                operation_id: body.get_u64_le(),
                payload: get_bytes(&mut body)?,
            },
            other => return Err(MasterError::Protocol(format!("unknown frame tag {other}"))),
        };
        Ok(Some(frame))
    }
}

/// Encodes a single frame into a standalone buffer, for tests and for the
/// response manager's delivery path.
pub fn encode_to_vec(frame: MasterFrame) -> Result<Vec<u8>, MasterError> {
    let mut buf = BytesMut::new();
    MasterFrameCodec.encode(frame, &mut buf)?;
    Ok(buf.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: MasterFrame) {
        let mut buf = BytesMut::new();
        MasterFrameCodec.encode(frame.clone(), &mut buf).unwrap();
        let decoded = MasterFrameCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame, decoded);
        assert!(buf.is_empty());
    }

    #[test]
    fn roundtrips_simple_frames() {
        roundtrip(MasterFrame::Status);
        roundtrip(MasterFrame::Ok);
        roundtrip(MasterFrame::OperationId { operation_id: 42 });
        roundtrip(MasterFrame::Error {
            code: 7,
            message: "boom".into(),
        });
    }

    #[test]
    fn roundtrips_register_server_with_no_proxy() {
        roundtrip(MasterFrame::RegisterServer {
            proxy: None,
            listen_port: 38060,
            system_stats: Bytes::from_static(b"stats"),
            client_timestamp_us: 1234,
        });
    }

    #[test]
    fn roundtrips_move_range() {
        roundtrip(MasterFrame::MoveRange {
            source: "rs1".into(),
            table: "LoadTest".into(),
            range_spec: Bytes::from_static(b"start,end"),
            range_id: 99,
        });
    }

    #[test]
    fn decode_returns_none_on_partial_frame() {
        let mut buf = BytesMut::new();
        MasterFrameCodec.encode(MasterFrame::Status, &mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(MasterFrameCodec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn decode_rejects_unknown_tag() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u8(255);
        assert!(MasterFrameCodec.decode(&mut buf).is_err());
    }
}
