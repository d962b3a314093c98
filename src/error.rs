//! 에러 타입 정의

use thiserror::Error;

/// AFP 프로브 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("유효하지 않은 포맷 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("'PACKETNO'는 1보다 클 수 없음: {mode}")]
    InvalidPacketNoMode { mode: i8 },

    #[error("버킷 수는 2의 거듭제곱이어야 함: {buckets}")]
    InvalidBucketCount { buckets: usize },

    #[error("포트 수는 1 이상이어야 함: {ports}")]
    InvalidPortCount { ports: usize },

    #[error("aggregate 번호 인자가 필요함: {input:?}")]
    InvalidAggregateArg { input: String },

    #[error("알 수 없는 핸들러: {name:?}")]
    UnknownHandler { name: String },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("손상된 패킷 프레임")]
    MalformedFrame,

    #[error("채널 에러")]
    ChannelError,

    #[error("프로브 종료됨")]
    ProbeStopped,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
