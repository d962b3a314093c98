//! 프로브 설정

use crate::error::{Error, Result};
use crate::FLOW_BUCKETS;

/// 패킷 번호 어노테이션 모드
///
/// - 음수: 패킷 번호 추적 비활성 (항상 0번 슬롯에 기록, 존재 여부 카운터)
/// - 0 / 1: 두 어노테이션 슬롯 중 어느 쪽을 패킷 번호로 읽을지 선택
/// - 1 초과: 설정 단계에서 거부
pub const PACKETNO_DISABLED: i8 = -1;

/// AFP 프로브 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 패킷 번호 어노테이션 모드 (-1, 0, 1)
    pub packetno_mode: i8,

    /// 포트 수 (undelivered 쿼리는 2 포트 구성을 전제)
    pub port_count: usize,

    /// 플로우 테이블 버킷 수 (2의 거듭제곱)
    pub flow_buckets: usize,

    /// 인입 커맨드 채널 깊이
    pub intake_channel: usize,

    /// 전달(forward) 채널 깊이
    pub forward_channel: usize,

    /// 포트별 도착률 측정 윈도우 (패킷 수)
    pub stats_window_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            packetno_mode: 0,
            port_count: 2,
            flow_buckets: FLOW_BUCKETS,
            intake_channel: 1024,
            forward_channel: 1024,
            stats_window_size: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 설정 검증
    ///
    /// 검증 실패는 프로브 초기화 전체를 중단시키는 치명적 설정 에러
    pub fn validate(&self) -> Result<()> {
        if self.packetno_mode > 1 {
            return Err(Error::InvalidPacketNoMode {
                mode: self.packetno_mode,
            });
        }
        if !self.flow_buckets.is_power_of_two() {
            return Err(Error::InvalidBucketCount {
                buckets: self.flow_buckets,
            });
        }
        if self.port_count == 0 {
            return Err(Error::InvalidPortCount {
                ports: self.port_count,
            });
        }
        Ok(())
    }

    /// 패킷 번호 추적 여부
    pub fn packetno_enabled(&self) -> bool {
        self.packetno_mode >= 0
    }

    /// 존재 여부 카운터 설정 (패킷 번호 추적 없음)
    ///
    /// 모든 패킷이 0번 슬롯에 기록되므로 포트별 단순 패킷 수 카운터가 됨
    pub fn presence_only() -> Self {
        Self {
            packetno_mode: PACKETNO_DISABLED,
            ..Self::default()
        }
    }

    /// 전달 확인 프로브 설정 (2 포트, 슬롯 0)
    ///
    /// 포트 0 = 출발 지점, 포트 1 = 도착 확인 지점
    pub fn delivery_probe() -> Self {
        Self {
            packetno_mode: 0,
            port_count: 2,
            ..Self::default()
        }
    }

    /// 두 번째 어노테이션 슬롯을 쓰는 설정
    pub fn second_slot() -> Self {
        Self {
            packetno_mode: 1,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        assert!(Config::default().validate().is_ok());
        assert!(Config::presence_only().validate().is_ok());
        assert!(Config::delivery_probe().validate().is_ok());
        assert!(Config::second_slot().validate().is_ok());
    }

    #[test]
    fn test_packetno_mode_rejected() {
        let config = Config {
            packetno_mode: 2,
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidPacketNoMode { mode: 2 })
        ));
    }

    #[test]
    fn test_negative_mode_disables_tracking() {
        // 원 구현과 동일하게 음수는 전부 "비활성"으로 허용
        let config = Config {
            packetno_mode: -3,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert!(!config.packetno_enabled());
    }

    #[test]
    fn test_bucket_count_must_be_power_of_two() {
        let config = Config {
            flow_buckets: 100,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
