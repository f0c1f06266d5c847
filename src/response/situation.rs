//! 兜底场景标签：只用于日志与统计，从不展示给用户

use std::fmt;

use serde::Serialize;

/// 触发兜底文案的具体场景
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Situation {
    /// 准入层限流（排队满 / 后端繁忙标记）
    Throttled,
    /// 等待或执行超时
    Timeout,
    /// 结果为空
    NullResult,
    /// 映射结果里找不到可用文本
    NoValidDictResponse,
    /// 字符串结果为空、过短或像原始对象
    InvalidStringResult,
    /// 无字段的对象无法转成可读字符串
    ConversionError,
    /// 最终兜底转换得到的字符串未通过校验
    FinalConversionFailed,
    /// 归一化过程中出现意外错误
    ErrorInConversion,
    /// 所有转换途径都不可用
    CompleteConversionFailure,
    /// Agent 调用本身失败
    UpstreamFailure,
    Generic,
}

/// 场景大类，决定兜底文案的描述句
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SituationCategory {
    Throttling,
    Data,
    Technical,
    Generic,
}

impl Situation {
    pub fn tag(self) -> &'static str {
        match self {
            Situation::Throttled => "throttled",
            Situation::Timeout => "timeout",
            Situation::NullResult => "null_result",
            Situation::NoValidDictResponse => "no_valid_dict_response",
            Situation::InvalidStringResult => "invalid_string_result",
            Situation::ConversionError => "conversion_error",
            Situation::FinalConversionFailed => "final_conversion_failed",
            Situation::ErrorInConversion => "error_in_conversion",
            Situation::CompleteConversionFailure => "complete_conversion_failure",
            Situation::UpstreamFailure => "upstream_failure",
            Situation::Generic => "generic",
        }
    }

    pub fn category(self) -> SituationCategory {
        match self {
            Situation::Throttled | Situation::Timeout => SituationCategory::Throttling,
            Situation::NullResult
            | Situation::NoValidDictResponse
            | Situation::InvalidStringResult => SituationCategory::Data,
            Situation::ConversionError
            | Situation::FinalConversionFailed
            | Situation::ErrorInConversion
            | Situation::CompleteConversionFailure
            | Situation::UpstreamFailure => SituationCategory::Technical,
            Situation::Generic => SituationCategory::Generic,
        }
    }
}

impl fmt::Display for Situation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}
