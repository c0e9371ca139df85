use std::{fmt, str::FromStr};

use crate::error::LauncherError;

macro_rules! quant_format_enum {
    (
        $(
            $ftype:expr, $variant:ident, $summary:expr
        ),* $(,)?
    ) => {
        /// GGUF quantization presets accepted by `llama-quantize`.
        ///
        /// The discriminant mirrors `enum llama_ftype` in `llama.h`, so it can be
        /// compared against a file's `general.file_type`.
        #[repr(u32)]
        #[allow(non_camel_case_types)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum QuantFormat {
            $( $variant = $ftype ),*
        }

        impl QuantFormat {
            pub const ALL: &'static [QuantFormat] = &[ $( QuantFormat::$variant ),* ];

            /// Format code passed on the `llama-quantize` command line, e.g. `"Q4_K_M"`.
            pub const fn code(self) -> &'static str {
                match self { $( QuantFormat::$variant => stringify!($variant) ),* }
            }

            pub const fn summary(self) -> &'static str {
                match self { $( QuantFormat::$variant => $summary ),* }
            }

            pub const fn file_type(self) -> u32 {
                self as u32
            }
        }
    };
}

quant_format_enum! {
    2,  Q4_0,   "legacy 4-bit",
    7,  Q8_0,   "near lossless",
    10, Q2_K,   "maximum compression",
    11, Q3_K_S, "more compact",
    12, Q3_K_M, "compact",
    13, Q3_K_L, "compact, higher quality",
    14, Q4_K_S, "small 4-bit",
    15, Q4_K_M, "balanced",
    16, Q5_K_S, "small 5-bit",
    17, Q5_K_M, "high quality",
    18, Q6_K,   "very high quality",
}

impl QuantFormat {
    /// Presets offered first in the shells, best trade-off first.
    pub const RECOMMENDED: [QuantFormat; 3] =
        [QuantFormat::Q4_K_M, QuantFormat::Q3_K_S, QuantFormat::Q2_K];

    /// Label for pickers: `"Q4_K_M (balanced)"`.
    pub fn label(self) -> String {
        format!("{} ({})", self.code(), self.summary())
    }
}

impl Default for QuantFormat {
    fn default() -> Self {
        QuantFormat::Q4_K_M
    }
}

impl fmt::Display for QuantFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for QuantFormat {
    type Err = LauncherError;

    /// Accepts the bare code or a picker label such as `"Q4_K_M (balanced)"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.split_whitespace().next().unwrap_or_default();
        QuantFormat::ALL
            .iter()
            .copied()
            .find(|format| format.code().eq_ignore_ascii_case(code))
            .ok_or_else(|| LauncherError::InvalidConfig {
                field: "quantization format",
                reason: format!(
                    "unknown format '{s}', expected one of: {}",
                    QuantFormat::ALL
                        .iter()
                        .map(|f| f.code())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_llama_quantize_names() {
        assert_eq!(QuantFormat::Q4_K_M.code(), "Q4_K_M");
        assert_eq!(QuantFormat::Q4_K_M.file_type(), 15);
        assert_eq!(QuantFormat::Q2_K.to_string(), "Q2_K");
    }

    #[test]
    fn parses_codes_and_labels() {
        assert_eq!("q3_k_s".parse::<QuantFormat>().unwrap(), QuantFormat::Q3_K_S);
        assert_eq!(
            QuantFormat::Q4_K_M.label().parse::<QuantFormat>().unwrap(),
            QuantFormat::Q4_K_M
        );
        assert!("Q9_X".parse::<QuantFormat>().is_err());
        assert!("".parse::<QuantFormat>().is_err());
    }

    #[test]
    fn serde_uses_the_code() {
        let json = serde_json::to_string(&QuantFormat::Q5_K_M).unwrap();
        assert_eq!(json, "\"Q5_K_M\"");
    }
}
