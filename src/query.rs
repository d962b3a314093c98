//! 쿼리/커맨드 표면 정의
//!
//! 운영자 도구가 쓰는 텍스트 경계:
//! - clear (쓰기): 플로우 상태 전체 삭제
//! - count (읽기): 전 플로우 전 포트 관측 횟수 합
//! - received / undelivered (읽기, 인자 있음): aggregate 하나의 재구성 결과
//!
//! 원격 제어 채널용 프레이밍 메시지도 여기서 정의함

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::packet::{AggregateId, PacketNo};
use crate::{FORMAT_VERSION, MAGIC_NUMBER};

/// 제어 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 쿼리/커맨드 요청
    Query = 1,

    /// 쿼리 응답
    Response = 2,

    /// 연결 종료
    Close = 3,
}

/// 제어 메시지 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 포맷 버전
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 페이로드 길이 (헤더 제외)
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload_len: u32) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: FORMAT_VERSION,
            msg_type,
            payload_len,
        }
    }
}

/// 파싱 완료된 요청 (이름 기반 디스패치의 태그드 변형)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// 플로우 상태 전체 삭제 (쓰기)
    Clear,

    /// 전체 관측 횟수 합 (읽기)
    Count,

    /// 한 플로우의 received 집합 (읽기)
    Received(AggregateId),

    /// 한 플로우의 undelivered 집합 (읽기)
    Undelivered(AggregateId),
}

impl Request {
    /// 핸들러 이름 + 텍스트 인자에서 요청 파싱
    ///
    /// 인자 파싱 실패는 그 쿼리 한 건만 실패시키고 카운터 상태에는 영향 없음
    pub fn parse(name: &str, arg: &str) -> Result<Self> {
        match name {
            "clear" => Ok(Request::Clear),
            "count" => Ok(Request::Count),
            "received" => Ok(Request::Received(parse_aggregate_arg(arg)?)),
            "undelivered" => Ok(Request::Undelivered(parse_aggregate_arg(arg)?)),
            _ => Err(Error::UnknownHandler {
                name: name.to_string(),
            }),
        }
    }

    /// 핸들러 이름 반환
    pub fn name(&self) -> &'static str {
        match self {
            Request::Clear => "clear",
            Request::Count => "count",
            Request::Received(_) => "received",
            Request::Undelivered(_) => "undelivered",
        }
    }

    /// 상태를 변경하는 요청인지
    pub fn is_write(&self) -> bool {
        matches!(self, Request::Clear)
    }
}

/// 주석/공백 제거
///
/// '#' 이후는 주석으로 버리고 앞뒤 공백을 지움
fn uncomment(s: &str) -> &str {
    let s = match s.find('#') {
        Some(pos) => &s[..pos],
        None => s,
    };
    s.trim()
}

/// aggregate 인자 파싱
///
/// 빈 인자는 0 (예약값, 빈 결과로 이어짐), 숫자가 아니면 파싱 에러
pub fn parse_aggregate_arg(arg: &str) -> Result<AggregateId> {
    let cleaned = uncomment(arg);
    if cleaned.is_empty() {
        return Ok(0);
    }
    cleaned
        .parse::<AggregateId>()
        .map_err(|_| Error::InvalidAggregateArg {
            input: arg.to_string(),
        })
}

/// 패킷 번호 목록을 한 줄에 하나씩 포맷
pub fn format_sequence(v: &[PacketNo]) -> String {
    let mut out = String::new();
    for n in v {
        out.push_str(&n.to_string());
        out.push('\n');
    }
    out
}

/// 쿼리 요청 메시지 (제어 채널용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMessage {
    /// 핸들러 이름 ("clear", "count", "received", "undelivered")
    pub name: String,

    /// 텍스트 인자 (없으면 빈 문자열)
    pub arg: String,
}

impl QueryMessage {
    pub fn new(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg: arg.into(),
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bincode::serialize(self).unwrap_or_default();
        let header = MessageHeader::new(MessageType::Query, payload.len() as u32);
        let header_bytes = bincode::serialize(&header).unwrap_or_default();

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        buf
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let header: MessageHeader = bincode::deserialize(bytes).ok()?;
        if header.magic != MAGIC_NUMBER || header.msg_type != MessageType::Query {
            return None;
        }

        let header_bytes = bincode::serialize(&header).ok()?;
        let header_size = header_bytes.len();

        if bytes.len() < header_size {
            return None;
        }

        bincode::deserialize(&bytes[header_size..]).ok()
    }
}

/// 쿼리 응답 메시지 (제어 채널용)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    /// 성공 여부
    pub ok: bool,

    /// 응답 본문 (성공 시 쿼리 결과 텍스트, 실패 시 에러 설명)
    pub body: String,
}

impl ResponseMessage {
    pub fn success(body: impl Into<String>) -> Self {
        Self {
            ok: true,
            body: body.into(),
        }
    }

    pub fn failure(body: impl Into<String>) -> Self {
        Self {
            ok: false,
            body: body.into(),
        }
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let payload = bincode::serialize(self).unwrap_or_default();
        let header = MessageHeader::new(MessageType::Response, payload.len() as u32);
        let header_bytes = bincode::serialize(&header).unwrap_or_default();

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        buf
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let header: MessageHeader = bincode::deserialize(bytes).ok()?;
        if header.magic != MAGIC_NUMBER || header.msg_type != MessageType::Response {
            return None;
        }

        let header_bytes = bincode::serialize(&header).ok()?;
        let header_size = header_bytes.len();

        if bytes.len() < header_size {
            return None;
        }

        bincode::deserialize(&bytes[header_size..]).ok()
    }
}
