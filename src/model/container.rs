//! GGUF / GGML header inspection.
//!
//! Only what the launcher needs: is this a model container we can hand to
//! llama.cpp, and is it FP16 or already quantized. Tensor data is never read.
//!
//! Layout reference: <https://github.com/ggml-org/ggml/blob/master/docs/gguf.md>

use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use byteorder::{LittleEndian, ReadBytesExt};

use super::ModelFormat;
use crate::error::{LauncherError, LauncherResult, LoadFailure};

const GGUF_MAGIC: u32 = 0x4655_4747;
const GGML_MAGIC: u32 = 0x6767_6d6c;
const GGMF_MAGIC: u32 = 0x6767_6d66;
const GGJT_MAGIC: u32 = 0x6767_6a74;

const FILE_TYPE_KEY: &str = "general.file_type";
const NAME_KEY: &str = "general.name";

/// `llama_ftype` values that hold un-quantized weights: F32, F16, BF16.
const UNQUANTIZED_FILE_TYPES: [u32; 3] = [0, 1, 32];

const MAX_KEY_LEN: u64 = 64 * 1024;
const MAX_STRING_LEN: u64 = 64 * 1024 * 1024;
const MAX_KV_COUNT: u64 = 1 << 20;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LegacyMagic {
    Ggml,
    Ggmf,
    Ggjt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ContainerKind {
    Gguf { version: u32 },
    Legacy(LegacyMagic),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerInfo {
    pub kind: ContainerKind,
    /// `general.file_type`, when the header carries it.
    pub file_type: Option<u32>,
    pub name: Option<String>,
}

impl ContainerInfo {
    pub fn format(&self) -> Option<ModelFormat> {
        self.file_type.map(|file_type| {
            if UNQUANTIZED_FILE_TYPES.contains(&file_type) {
                ModelFormat::RawFp16
            } else {
                ModelFormat::Quantized
            }
        })
    }
}

/// Reads the container header of `path`.
///
/// A bad magic or unsupported GGUF version is a load error. Metadata is read
/// best-effort: a truncated or odd key/value section only loses `file_type`.
pub fn inspect(path: &Path) -> LauncherResult<ContainerInfo> {
    let file = File::open(path).map_err(|e| {
        let reason = match e.kind() {
            io::ErrorKind::NotFound => LoadFailure::NotFound,
            _ => LoadFailure::Unreadable(e.to_string()),
        };
        LauncherError::load(path, reason)
    })?;
    read_header(&mut BufReader::new(file)).map_err(|reason| LauncherError::load(path, reason))
}

pub fn read_header<R: Read>(reader: &mut R) -> Result<ContainerInfo, LoadFailure> {
    let magic = reader.read_u32::<LittleEndian>().map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            LoadFailure::InvalidContainer("file is too short to hold a header".to_string())
        }
        _ => LoadFailure::Unreadable(e.to_string()),
    })?;

    let kind = match magic {
        GGUF_MAGIC => {
            let version = reader.read_u32::<LittleEndian>().map_err(|_| {
                LoadFailure::InvalidContainer("GGUF header ends before the version".to_string())
            })?;
            if !(1..=3).contains(&version) {
                return Err(LoadFailure::InvalidContainer(format!(
                    "unsupported GGUF version {version}"
                )));
            }
            ContainerKind::Gguf { version }
        }
        GGML_MAGIC => ContainerKind::Legacy(LegacyMagic::Ggml),
        GGMF_MAGIC => ContainerKind::Legacy(LegacyMagic::Ggmf),
        GGJT_MAGIC => ContainerKind::Legacy(LegacyMagic::Ggjt),
        other => {
            return Err(LoadFailure::InvalidContainer(format!(
                "unknown magic 0x{other:08x}"
            )))
        }
    };

    let mut info = ContainerInfo {
        kind,
        file_type: None,
        name: None,
    };
    if let ContainerKind::Gguf { version } = kind {
        if let Err(e) = read_metadata(reader, version, &mut info) {
            tracing::debug!(error = %e, "GGUF metadata unreadable; falling back to file name");
        }
    }
    Ok(info)
}

fn read_metadata<R: Read>(reader: &mut R, version: u32, info: &mut ContainerInfo) -> io::Result<()> {
    let _tensor_count = read_len(reader, version)?;
    let kv_count = read_len(reader, version)?;
    if kv_count > MAX_KV_COUNT {
        return Err(invalid(format!("implausible metadata count {kv_count}")));
    }

    for _ in 0..kv_count {
        let key = read_string(reader, version, MAX_KEY_LEN)?;
        let kind = reader.read_u32::<LittleEndian>()?;
        match key.as_str() {
            FILE_TYPE_KEY => info.file_type = Some(read_integer(reader, kind)?),
            NAME_KEY if kind == value_type::STRING => {
                info.name = Some(read_string(reader, version, MAX_KEY_LEN)?)
            }
            _ => skip_value(reader, kind, version)?,
        }
        if info.file_type.is_some() && info.name.is_some() {
            break;
        }
    }
    Ok(())
}

mod value_type {
    pub const U8: u32 = 0;
    pub const I8: u32 = 1;
    pub const U16: u32 = 2;
    pub const I16: u32 = 3;
    pub const U32: u32 = 4;
    pub const I32: u32 = 5;
    pub const F32: u32 = 6;
    pub const BOOL: u32 = 7;
    pub const STRING: u32 = 8;
    pub const ARRAY: u32 = 9;
    pub const U64: u32 = 10;
    pub const I64: u32 = 11;
    pub const F64: u32 = 12;
}

fn fixed_size(kind: u32) -> Option<u64> {
    use value_type::*;
    match kind {
        U8 | I8 | BOOL => Some(1),
        U16 | I16 => Some(2),
        U32 | I32 | F32 => Some(4),
        U64 | I64 | F64 => Some(8),
        _ => None,
    }
}

fn read_len<R: Read>(reader: &mut R, version: u32) -> io::Result<u64> {
    if version == 1 {
        Ok(reader.read_u32::<LittleEndian>()? as u64)
    } else {
        reader.read_u64::<LittleEndian>()
    }
}

fn read_string<R: Read>(reader: &mut R, version: u32, max_len: u64) -> io::Result<String> {
    let len = read_len(reader, version)?;
    if len > max_len {
        return Err(invalid(format!("string length {len} exceeds {max_len}")));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes)?;
    // Some writers null-terminate despite the format saying otherwise.
    while let Some(0) = bytes.last() {
        bytes.pop();
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_integer<R: Read>(reader: &mut R, kind: u32) -> io::Result<u32> {
    use value_type::*;
    let value: i128 = match kind {
        U8 => reader.read_u8()? as i128,
        I8 => reader.read_i8()? as i128,
        U16 => reader.read_u16::<LittleEndian>()? as i128,
        I16 => reader.read_i16::<LittleEndian>()? as i128,
        U32 => reader.read_u32::<LittleEndian>()? as i128,
        I32 => reader.read_i32::<LittleEndian>()? as i128,
        U64 => reader.read_u64::<LittleEndian>()? as i128,
        I64 => reader.read_i64::<LittleEndian>()? as i128,
        other => return Err(invalid(format!("{FILE_TYPE_KEY} has non-integer type {other}"))),
    };
    u32::try_from(value).map_err(|_| invalid(format!("{FILE_TYPE_KEY} out of range: {value}")))
}

fn skip_value<R: Read>(reader: &mut R, kind: u32, version: u32) -> io::Result<()> {
    if let Some(size) = fixed_size(kind) {
        return skip_bytes(reader, size);
    }
    match kind {
        value_type::STRING => {
            let len = read_len(reader, version)?;
            if len > MAX_STRING_LEN {
                return Err(invalid(format!("string length {len} exceeds {MAX_STRING_LEN}")));
            }
            skip_bytes(reader, len)
        }
        value_type::ARRAY => {
            let element_type = reader.read_u32::<LittleEndian>()?;
            let count = read_len(reader, version)?;
            if let Some(size) = fixed_size(element_type) {
                let total = count
                    .checked_mul(size)
                    .ok_or_else(|| invalid(format!("array of {count} elements overflows")))?;
                skip_bytes(reader, total)
            } else {
                for _ in 0..count {
                    skip_value(reader, element_type, version)?;
                }
                Ok(())
            }
        }
        other => Err(invalid(format!("unknown metadata value type {other}"))),
    }
}

fn skip_bytes<R: Read>(reader: &mut R, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if copied < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "metadata ends early",
        ));
    }
    Ok(())
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
