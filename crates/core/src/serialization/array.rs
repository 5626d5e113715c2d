//! Dense n-dimensional arrays and their `.npy`-over-base64 text encoding.
//!
//! The wire format is a NumPy `.npy` file wrapped in standard base64, so
//! payloads produced by `numpy.save` can be decoded here and vice versa.
//! Encoding always writes format version 1.0, little-endian, C order.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::CorruptPayload;

const MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Header (magic + version + length field + dict) is padded to this size.
const HEADER_ALIGN: usize = 64;

/// Element type of an [`NdArray`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn item_size(self) -> usize {
        match self {
            DType::Bool | DType::U8 => 1,
            DType::I32 | DType::F32 => 4,
            DType::I64 | DType::F64 => 8,
        }
    }

    fn descr(self) -> &'static str {
        match self {
            DType::Bool => "|b1",
            DType::U8 => "|u1",
            DType::I32 => "<i4",
            DType::I64 => "<i8",
            DType::F32 => "<f4",
            DType::F64 => "<f8",
        }
    }

    /// Parse a NumPy type descriptor. Returns the dtype and whether the data
    /// is stored big-endian.
    fn from_descr(descr: &str) -> Result<(Self, bool), CorruptPayload> {
        let (order, code) = match descr.chars().next() {
            Some(c @ ('<' | '>' | '|' | '=')) => (c, &descr[1..]),
            _ => ('=', descr),
        };
        let dtype = match code {
            "b1" | "?" => DType::Bool,
            "u1" | "B" => DType::U8,
            "i4" => DType::I32,
            "i8" => DType::I64,
            "f4" => DType::F32,
            "f8" => DType::F64,
            _ => return Err(CorruptPayload::UnsupportedDtype(descr.to_string())),
        };
        Ok((dtype, order == '>'))
    }
}

/// Typed element storage, always in C (row-major) order.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    Bool(Vec<bool>),
    U8(Vec<u8>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl ArrayData {
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(v) => v.len(),
            ArrayData::U8(v) => v.len(),
            ArrayData::I32(v) => v.len(),
            ArrayData::I64(v) => v.len(),
            ArrayData::F32(v) => v.len(),
            ArrayData::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayData::Bool(_) => DType::Bool,
            ArrayData::U8(_) => DType::U8,
            ArrayData::I32(_) => DType::I32,
            ArrayData::I64(_) => DType::I64,
            ArrayData::F32(_) => DType::F32,
            ArrayData::F64(_) => DType::F64,
        }
    }
}

/// A dense n-dimensional numeric array.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Build an array, checking that the element count matches the shape.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> Result<Self, CorruptPayload> {
        let expected = element_count(&shape)?;
        if expected != data.len() {
            return Err(CorruptPayload::ShapeMismatch {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements widened to `f64`, in C order. Booleans map to `0.0`/`1.0`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        match &self.data {
            ArrayData::Bool(v) => v.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            ArrayData::U8(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::I32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::I64(v) => v.iter().map(|&x| x as f64).collect(),
            ArrayData::F32(v) => v.iter().map(|&x| f64::from(x)).collect(),
            ArrayData::F64(v) => v.clone(),
        }
    }

    /// Same elements with a different shape of equal size.
    pub fn reshaped(self, shape: Vec<usize>) -> Result<Self, CorruptPayload> {
        Self::new(shape, self.data)
    }
}

fn element_count(shape: &[usize]) -> Result<usize, CorruptPayload> {
    shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or(CorruptPayload::Malformed("array shape overflows".into()))
}

/// Encode an array as base64 text of a `.npy` v1.0 file.
pub fn encode_array(array: &NdArray) -> String {
    BASE64.encode(to_npy_bytes(array))
}

/// Decode text produced by [`encode_array`] (or by `numpy.save` + base64).
pub fn decode_array(encoded: &str) -> Result<NdArray, CorruptPayload> {
    let bytes = BASE64.decode(encoded.trim())?;
    from_npy_bytes(&bytes)
}

fn to_npy_bytes(array: &NdArray) -> Vec<u8> {
    let shape = match array.shape.as_slice() {
        [] => "()".to_string(),
        [only] => format!("({only},)"),
        dims => {
            let parts: Vec<String> = dims.iter().map(usize::to_string).collect();
            format!("({})", parts.join(", "))
        }
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {shape}, }}",
        array.dtype().descr()
    );
    // magic(6) + version(2) + header length(2) + header + trailing newline
    let unpadded = MAGIC.len() + 4 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let data_len = array.len() * array.dtype().item_size();
    let mut out = Vec::with_capacity(MAGIC.len() + 4 + header.len() + data_len);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());

    match &array.data {
        ArrayData::Bool(v) => out.extend(v.iter().map(|&b| u8::from(b))),
        ArrayData::U8(v) => out.extend_from_slice(v),
        ArrayData::I32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ArrayData::I64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ArrayData::F32(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
        ArrayData::F64(v) => v.iter().for_each(|x| out.extend_from_slice(&x.to_le_bytes())),
    }
    out
}

fn from_npy_bytes(bytes: &[u8]) -> Result<NdArray, CorruptPayload> {
    let rest = bytes
        .strip_prefix(MAGIC.as_slice())
        .ok_or(CorruptPayload::Malformed("missing .npy magic".into()))?;
    let (major, rest) = match rest {
        [major, _minor, rest @ ..] => (*major, rest),
        _ => return Err(CorruptPayload::Malformed("truncated .npy version".into())),
    };
    let (header_len, rest) = match major {
        1 => {
            let (len, rest) = split_checked(rest, 2)?;
            (usize::from(u16::from_le_bytes([len[0], len[1]])), rest)
        }
        2 | 3 => {
            let (len, rest) = split_checked(rest, 4)?;
            let len = u32::from_le_bytes([len[0], len[1], len[2], len[3]]);
            (len as usize, rest)
        }
        other => {
            return Err(CorruptPayload::Malformed(format!(
                "unsupported .npy version {other}"
            )))
        }
    };
    let (header, body) = split_checked(rest, header_len)?;
    let header = std::str::from_utf8(header)
        .map_err(|_| CorruptPayload::Malformed("header is not text".into()))?;
    let header = NpyHeader::parse(header)?;

    let count = element_count(&header.shape)?;
    let expected_bytes = count
        .checked_mul(header.dtype.item_size())
        .ok_or(CorruptPayload::Malformed("array size overflows".into()))?;
    if body.len() != expected_bytes {
        return Err(CorruptPayload::Malformed(format!(
            "expected {expected_bytes} data bytes, found {}",
            body.len()
        )));
    }

    let data = decode_elements(header.dtype, header.big_endian, body)?;
    let data = if header.fortran_order {
        fortran_to_c_order(data, &header.shape)
    } else {
        data
    };
    NdArray::new(header.shape, data)
}

fn split_checked(bytes: &[u8], at: usize) -> Result<(&[u8], &[u8]), CorruptPayload> {
    if bytes.len() < at {
        return Err(CorruptPayload::Malformed("truncated .npy header".into()));
    }
    Ok(bytes.split_at(at))
}

macro_rules! read_numbers {
    ($body:expr, $ty:ty, $big_endian:expr) => {{
        const N: usize = std::mem::size_of::<$ty>();
        $body
            .chunks_exact(N)
            .map(|chunk| {
                let mut raw = [0u8; N];
                raw.copy_from_slice(chunk);
                if $big_endian {
                    <$ty>::from_be_bytes(raw)
                } else {
                    <$ty>::from_le_bytes(raw)
                }
            })
            .collect::<Vec<$ty>>()
    }};
}

fn decode_elements(dtype: DType, big_endian: bool, body: &[u8]) -> Result<ArrayData, CorruptPayload> {
    Ok(match dtype {
        DType::Bool => ArrayData::Bool(
            body.iter()
                .map(|&b| match b {
                    0 => Ok(false),
                    1 => Ok(true),
                    other => Err(CorruptPayload::Malformed(format!("invalid bool byte {other}"))),
                })
                .collect::<Result<_, _>>()?,
        ),
        DType::U8 => ArrayData::U8(body.to_vec()),
        DType::I32 => ArrayData::I32(read_numbers!(body, i32, big_endian)),
        DType::I64 => ArrayData::I64(read_numbers!(body, i64, big_endian)),
        DType::F32 => ArrayData::F32(read_numbers!(body, f32, big_endian)),
        DType::F64 => ArrayData::F64(read_numbers!(body, f64, big_endian)),
    })
}

/// Reorder column-major elements into row-major order.
fn fortran_to_c_order(data: ArrayData, shape: &[usize]) -> ArrayData {
    fn permute<T: Copy>(src: &[T], shape: &[usize]) -> Vec<T> {
        let mut out = Vec::with_capacity(src.len());
        let mut index = vec![0usize; shape.len()];
        for _ in 0..src.len() {
            // Column-major offset of the current row-major index.
            let mut offset = 0;
            let mut stride = 1;
            for (axis, &dim) in shape.iter().enumerate() {
                offset += index[axis] * stride;
                stride *= dim;
            }
            out.push(src[offset]);
            for axis in (0..shape.len()).rev() {
                index[axis] += 1;
                if index[axis] < shape[axis] {
                    break;
                }
                index[axis] = 0;
            }
        }
        out
    }

    if shape.len() < 2 {
        return data;
    }
    match data {
        ArrayData::Bool(v) => ArrayData::Bool(permute(&v, shape)),
        ArrayData::U8(v) => ArrayData::U8(permute(&v, shape)),
        ArrayData::I32(v) => ArrayData::I32(permute(&v, shape)),
        ArrayData::I64(v) => ArrayData::I64(permute(&v, shape)),
        ArrayData::F32(v) => ArrayData::F32(permute(&v, shape)),
        ArrayData::F64(v) => ArrayData::F64(permute(&v, shape)),
    }
}

/// The fields we need from the Python-literal `.npy` header dict.
struct NpyHeader {
    dtype: DType,
    big_endian: bool,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl NpyHeader {
    fn parse(header: &str) -> Result<Self, CorruptPayload> {
        let descr = dict_value(header, "descr")?;
        let descr = descr
            .trim()
            .trim_matches(|c| c == '\'' || c == '"');
        let (dtype, big_endian) = DType::from_descr(descr)?;

        let fortran_order = match dict_value(header, "fortran_order")?.trim() {
            "True" => true,
            "False" => false,
            other => {
                return Err(CorruptPayload::Malformed(format!(
                    "invalid fortran_order {other}"
                )))
            }
        };

        let shape = dict_value(header, "shape")?;
        let shape = shape
            .trim()
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or(CorruptPayload::Malformed("shape is not a tuple".into()))?;
        let shape = shape
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.trim_end_matches('L')
                    .parse::<usize>()
                    .map_err(|_| CorruptPayload::Malformed(format!("invalid dimension {s}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            dtype,
            big_endian,
            fortran_order,
            shape,
        })
    }
}

/// Extract the raw text of `key`'s value from a flat Python dict literal.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, CorruptPayload> {
    let missing = || CorruptPayload::Malformed(format!("header has no '{key}'"));
    let start = [format!("'{key}'"), format!("\"{key}\"")]
        .iter()
        .find_map(|quoted| header.find(quoted.as_str()).map(|i| i + quoted.len()))
        .ok_or_else(missing)?;
    let value = header[start..].trim_start().strip_prefix(':').ok_or_else(missing)?;
    let value = value.trim_start();
    let end = if value.starts_with('(') {
        value.find(')').map(|i| i + 1)
    } else if let Some(quote @ ('\'' | '"')) = value.chars().next() {
        value[1..].find(quote).map(|i| i + 2)
    } else {
        value.find([',', '}'])
    }
    .ok_or_else(missing)?;
    Ok(&value[..end])
}
