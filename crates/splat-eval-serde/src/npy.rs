// Reading and writing of numpy `.npy` arrays.
//
// Layout: 6 byte magic, 2 version bytes, a little endian header length (u16 for v1, u32 for
// v2/v3), an ascii python dict literal describing the array, then the raw data.
use burn::tensor::{DType, TensorData};

use crate::ArchiveError;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElemKind {
    Float,
    Int,
    UInt,
    Bool,
}

#[derive(Debug, PartialEq, Eq)]
struct Descr {
    order: ByteOrder,
    kind: ElemKind,
    size: usize,
}

#[derive(Debug, PartialEq, Eq)]
struct Header {
    descr: Descr,
    fortran_order: bool,
    shape: Vec<usize>,
}

fn invalid_header(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::InvalidHeader(msg.into())
}

fn parse_descr(descr: &str) -> Result<Descr, ArchiveError> {
    let mut chars = descr.chars();
    let (order, kind) = match (chars.next(), chars.next()) {
        (Some(o @ ('<' | '>' | '|' | '=')), Some(k)) => (o, k),
        (Some(k), _) if k.is_ascii_alphabetic() => ('|', k),
        _ => return Err(invalid_header(format!("Malformed descr '{descr}'"))),
    };

    let size_str = descr.trim_start_matches(['<', '>', '|', '=']).get(1..).unwrap_or("");
    let size: usize = size_str
        .parse()
        .map_err(|_| ArchiveError::UnsupportedDtype(descr.to_owned()))?;

    let kind = match kind {
        'f' => ElemKind::Float,
        'i' => ElemKind::Int,
        'u' => ElemKind::UInt,
        'b' => ElemKind::Bool,
        'O' => return Err(ArchiveError::ObjectArray),
        _ => return Err(ArchiveError::UnsupportedDtype(descr.to_owned())),
    };

    let supported = match kind {
        ElemKind::Float => matches!(size, 4 | 8),
        ElemKind::Int | ElemKind::UInt => matches!(size, 1 | 2 | 4 | 8),
        ElemKind::Bool => size == 1,
    };
    if !supported {
        return Err(ArchiveError::UnsupportedDtype(descr.to_owned()));
    }

    let order = if order == '>' {
        ByteOrder::Big
    } else {
        ByteOrder::Little
    };

    Ok(Descr { order, kind, size })
}

/// Find the value following `'key':` in the header dict.
fn dict_value<'a>(header: &'a str, key: &str) -> Result<&'a str, ArchiveError> {
    let pattern_single = format!("'{key}'");
    let pattern_double = format!("\"{key}\"");
    let start = header
        .find(&pattern_single)
        .map(|i| i + pattern_single.len())
        .or_else(|| header.find(&pattern_double).map(|i| i + pattern_double.len()))
        .ok_or_else(|| invalid_header(format!("Missing key '{key}'")))?;
    let rest = header[start..].trim_start();
    let rest = rest
        .strip_prefix(':')
        .ok_or_else(|| invalid_header(format!("Expected ':' after '{key}'")))?;
    Ok(rest.trim_start())
}

fn parse_header(header: &str) -> Result<Header, ArchiveError> {
    let descr_value = dict_value(header, "descr")?;
    let quote = descr_value
        .chars()
        .next()
        .filter(|c| *c == '\'' || *c == '"')
        .ok_or_else(|| invalid_header("descr is not a string"))?;
    let descr_end = descr_value[1..]
        .find(quote)
        .ok_or_else(|| invalid_header("Unterminated descr"))?;
    let descr = parse_descr(&descr_value[1..=descr_end])?;

    let fortran_value = dict_value(header, "fortran_order")?;
    let fortran_order = if fortran_value.starts_with("True") {
        true
    } else if fortran_value.starts_with("False") {
        false
    } else {
        return Err(invalid_header("fortran_order is not a bool"));
    };

    let shape_value = dict_value(header, "shape")?;
    let shape_value = shape_value
        .strip_prefix('(')
        .ok_or_else(|| invalid_header("shape is not a tuple"))?;
    let shape_end = shape_value
        .find(')')
        .ok_or_else(|| invalid_header("Unterminated shape"))?;
    let shape = shape_value[..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.trim_end_matches('L')
                .parse::<usize>()
                .map_err(|_| invalid_header(format!("Invalid dimension '{s}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Header {
        descr,
        fortran_order,
        shape,
    })
}

/// Reorder column-major values into row-major order.
fn fortran_to_c<T: Copy>(values: &[T], shape: &[usize]) -> Vec<T> {
    if shape.len() < 2 {
        return values.to_vec();
    }

    let mut out = Vec::with_capacity(values.len());
    let mut index = vec![0usize; shape.len()];
    for _ in 0..values.len() {
        // Column-major offset of the current row-major index.
        let mut offset = 0;
        let mut stride = 1;
        for (i, dim) in index.iter().zip(shape) {
            offset += i * stride;
            stride *= dim;
        }
        out.push(values[offset]);

        for d in (0..shape.len()).rev() {
            index[d] += 1;
            if index[d] < shape[d] {
                break;
            }
            index[d] = 0;
        }
    }
    out
}

fn decode_values<T: Copy, const N: usize>(
    bytes: &[u8],
    order: ByteOrder,
    from_le: fn([u8; N]) -> T,
    from_be: fn([u8; N]) -> T,
) -> Vec<T> {
    let convert = match order {
        ByteOrder::Little => from_le,
        ByteOrder::Big => from_be,
    };
    bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut word = [0u8; N];
            word.copy_from_slice(chunk);
            convert(word)
        })
        .collect()
}

fn into_tensor_data<T: burn::tensor::Element>(
    values: Vec<T>,
    header: &Header,
) -> TensorData {
    let values = if header.fortran_order {
        fortran_to_c(&values, &header.shape)
    } else {
        values
    };
    TensorData::new(values, header.shape.clone())
}

/// Decode a single `.npy` blob.
pub fn decode_npy(bytes: &[u8]) -> Result<TensorData, ArchiveError> {
    let rest = bytes
        .strip_prefix(MAGIC)
        .ok_or_else(|| invalid_header("Missing NUMPY magic"))?;
    let [major, _minor, rest @ ..] = rest else {
        return Err(ArchiveError::Truncated);
    };

    let (header_len, rest) = match major {
        1 => {
            let [a, b, rest @ ..] = rest else {
                return Err(ArchiveError::Truncated);
            };
            (u16::from_le_bytes([*a, *b]) as usize, rest)
        }
        2 | 3 => {
            let [a, b, c, d, rest @ ..] = rest else {
                return Err(ArchiveError::Truncated);
            };
            (u32::from_le_bytes([*a, *b, *c, *d]) as usize, rest)
        }
        v => return Err(invalid_header(format!("Unsupported npy version {v}"))),
    };

    if rest.len() < header_len {
        return Err(ArchiveError::Truncated);
    }
    let (header, data) = rest.split_at(header_len);
    let header = std::str::from_utf8(header).map_err(|_| invalid_header("Header is not utf8"))?;
    let header = parse_header(header)?;

    let byte_len = header
        .shape
        .iter()
        .try_fold(header.descr.size, |len, &dim| len.checked_mul(dim))
        .ok_or_else(|| invalid_header(format!("Shape {:?} is too large", header.shape)))?;
    if data.len() < byte_len {
        return Err(ArchiveError::Truncated);
    }
    let data = &data[..byte_len];
    let order = header.descr.order;

    let tensor_data = match (header.descr.kind, header.descr.size) {
        (ElemKind::Float, 4) => into_tensor_data(
            decode_values(data, order, f32::from_le_bytes, f32::from_be_bytes),
            &header,
        ),
        (ElemKind::Float, 8) => into_tensor_data(
            decode_values(data, order, f64::from_le_bytes, f64::from_be_bytes),
            &header,
        ),
        (ElemKind::Int, 1) => into_tensor_data(
            decode_values(data, order, i8::from_le_bytes, i8::from_be_bytes),
            &header,
        ),
        (ElemKind::Int, 2) => into_tensor_data(
            decode_values(data, order, i16::from_le_bytes, i16::from_be_bytes),
            &header,
        ),
        (ElemKind::Int, 4) => into_tensor_data(
            decode_values(data, order, i32::from_le_bytes, i32::from_be_bytes),
            &header,
        ),
        (ElemKind::Int, 8) => into_tensor_data(
            decode_values(data, order, i64::from_le_bytes, i64::from_be_bytes),
            &header,
        ),
        (ElemKind::UInt | ElemKind::Bool, 1) => into_tensor_data(data.to_vec(), &header),
        (ElemKind::UInt, 2) => into_tensor_data(
            decode_values(data, order, u16::from_le_bytes, u16::from_be_bytes),
            &header,
        ),
        (ElemKind::UInt, 4) => into_tensor_data(
            decode_values(data, order, u32::from_le_bytes, u32::from_be_bytes),
            &header,
        ),
        (ElemKind::UInt, 8) => into_tensor_data(
            decode_values(data, order, u64::from_le_bytes, u64::from_be_bytes),
            &header,
        ),
        (kind, size) => {
            return Err(ArchiveError::UnsupportedDtype(format!("{kind:?}{size}")));
        }
    };

    Ok(tensor_data)
}

fn descr_for(dtype: DType) -> Option<&'static str> {
    match dtype {
        DType::F64 => Some("<f8"),
        DType::F32 => Some("<f4"),
        DType::I64 => Some("<i8"),
        DType::I32 => Some("<i4"),
        DType::U8 => Some("|u1"),
        _ => None,
    }
}

fn le_bytes<T: burn::tensor::Element, const N: usize>(
    data: &TensorData,
    to_le: fn(T) -> [u8; N],
) -> Result<Vec<u8>, ArchiveError> {
    let values = data
        .to_vec::<T>()
        .map_err(|e| ArchiveError::UnsupportedDtype(format!("{e:?}")))?;
    Ok(values.into_iter().flat_map(to_le).collect())
}

/// Encode an array as a version 1 `.npy` blob.
pub fn encode_npy(data: &TensorData) -> Result<Vec<u8>, ArchiveError> {
    let descr =
        descr_for(data.dtype).ok_or_else(|| ArchiveError::UnsupportedDtype(format!("{:?}", data.dtype)))?;

    let shape = match data.shape.as_slice() {
        [single] => format!("({single},)"),
        dims => format!(
            "({})",
            dims.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header =
        format!("{{'descr': '{descr}', 'fortran_order': False, 'shape': {shape}, }}");
    // Pad so that the data starts aligned, header ends in a newline.
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.push_str(&" ".repeat(padding));
    header.push('\n');

    let header_len = u16::try_from(header.len())
        .map_err(|_| invalid_header("Header too long for npy v1"))?;

    let body = match data.dtype {
        DType::F64 => le_bytes(data, f64::to_le_bytes)?,
        DType::F32 => le_bytes(data, f32::to_le_bytes)?,
        DType::I64 => le_bytes(data, i64::to_le_bytes)?,
        DType::I32 => le_bytes(data, i32::to_le_bytes)?,
        _ => le_bytes(data, u8::to_le_bytes)?,
    };

    let mut out = Vec::with_capacity(unpadded + padding + body.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&header_len.to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn npy_with_header(header: &str, body: &[u8]) -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(body);
        bytes
    }

    #[test]
    fn parses_header_dict() {
        let header =
            parse_header("{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }").unwrap();
        assert_eq!(header.shape, vec![3, 4]);
        assert!(!header.fortran_order);
        assert_eq!(
            header.descr,
            Descr {
                order: ByteOrder::Little,
                kind: ElemKind::Float,
                size: 4
            }
        );

        let scalar = parse_header("{'descr': '|u1', 'fortran_order': True, 'shape': (), }").unwrap();
        assert!(scalar.shape.is_empty());
        assert!(scalar.fortran_order);

        let vector = parse_header("{'descr': '>i8', 'fortran_order': False, 'shape': (7,), }").unwrap();
        assert_eq!(vector.shape, vec![7]);
        assert_eq!(vector.descr.order, ByteOrder::Big);
    }

    #[test]
    fn rejects_object_and_exotic_dtypes() {
        assert!(matches!(parse_descr("|O"), Err(ArchiveError::ObjectArray)));
        assert!(matches!(
            parse_descr("<c16"),
            Err(ArchiveError::UnsupportedDtype(_))
        ));
        assert!(matches!(
            parse_descr("<f2"),
            Err(ArchiveError::UnsupportedDtype(_))
        ));
    }

    #[test]
    fn decodes_fortran_ordered_data() {
        // [[1, 2, 3], [4, 5, 6]] stored column-major.
        let body: Vec<u8> = [1i32, 4, 2, 5, 3, 6]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let bytes = npy_with_header(
            "{'descr': '<i4', 'fortran_order': True, 'shape': (2, 3), }\n",
            &body,
        );
        let data = decode_npy(&bytes).unwrap();
        assert_eq!(data.shape, vec![2, 3]);
        assert_eq!(data.to_vec::<i32>().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn decodes_big_endian_floats() {
        let body: Vec<u8> = [1.5f64, -2.0].iter().flat_map(|v| v.to_be_bytes()).collect();
        let bytes = npy_with_header("{'descr': '>f8', 'fortran_order': False, 'shape': (2,), }\n", &body);
        let data = decode_npy(&bytes).unwrap();
        assert_eq!(data.to_vec::<f64>().unwrap(), vec![1.5, -2.0]);
    }

    #[test]
    fn encoded_header_is_aligned() {
        let data = TensorData::new(vec![0.5f32; 6], [2, 3]);
        let bytes = encode_npy(&data).unwrap();
        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % HEADER_ALIGN, 0);
        assert_eq!(bytes.len(), 10 + header_len + 6 * 4);

        let decoded = decode_npy(&bytes).unwrap();
        assert_eq!(decoded.shape, vec![2, 3]);
        assert_eq!(decoded.to_vec::<f32>().unwrap(), vec![0.5; 6]);
    }

    #[test]
    fn oversized_shape_is_an_error() {
        let bytes = npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4611686018427387904, 8), }\n",
            &[0u8; 16],
        );
        assert!(matches!(
            decode_npy(&bytes),
            Err(ArchiveError::InvalidHeader(_))
        ));
    }

    #[test]
    fn truncated_data_is_an_error() {
        let bytes = npy_with_header(
            "{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }\n",
            &[0u8; 8],
        );
        assert!(matches!(decode_npy(&bytes), Err(ArchiveError::Truncated)));
        assert!(decode_npy(b"not an npy file").is_err());
    }
}
