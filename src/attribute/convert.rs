//! Stock reader/writer pairs for common attribute conversions.
//!
//! The registry stores raw device representations; the attribute side wants
//! engineering units and friendlier types. These factories cover the
//! recurring cases: fixed-point scaling, saturating narrowing, negated and
//! enum-backed booleans, a two-node mode composite, min-over-subnodes and
//! first-element-of-spectrum access. Anything device-specific stays with
//! the caller, using the same function signatures.

use std::sync::Arc;

use crate::attribute::{ScalarReader, ScalarWriter};
use crate::error::Result;
use crate::registry::{RemoteHandle, RemotePath};

/// Signed fixed-point leaf scaled into a float.
///
/// `raw_per_unit` is the device resolution: reads divide the stored `i32`
/// by it (e.g. `1e6` for nanometres read out in millimetres), writes
/// multiply and saturate at the integer range bounds.
pub fn scaled_i32(raw_per_unit: f64) -> (ScalarReader<f64>, ScalarWriter<f64>) {
    let reader: ScalarReader<f64> = Arc::new(move |handle, path| {
        let raw: i32 = handle.get(path)?;
        Ok(f64::from(raw) / raw_per_unit)
    });
    let writer: ScalarWriter<f64> = Arc::new(move |handle, path, value| {
        handle.set(path, saturate_i32(value * raw_per_unit))
    });
    (reader, writer)
}

/// Unsigned fixed-point leaf scaled into a float. Writes clamp at zero.
pub fn scaled_u32(raw_per_unit: f64) -> (ScalarReader<f64>, ScalarWriter<f64>) {
    let reader: ScalarReader<f64> = Arc::new(move |handle, path| {
        let raw: u32 = handle.get(path)?;
        Ok(f64::from(raw) / raw_per_unit)
    });
    let writer: ScalarWriter<f64> = Arc::new(move |handle, path, value| {
        let raw = (value * raw_per_unit).max(0.0).min(f64::from(u32::MAX));
        handle.set(path, raw as u32)
    });
    (reader, writer)
}

/// `i32` leaf exposed as a float, written back with saturation at the
/// integer range bounds.
pub fn int_as_f64() -> (ScalarReader<f64>, ScalarWriter<f64>) {
    scaled_i32(1.0)
}

/// Boolean leaf with inverted polarity on both directions.
pub fn negated_bool() -> (ScalarReader<bool>, ScalarWriter<bool>) {
    let reader: ScalarReader<bool> = Arc::new(|handle, path| {
        let raw: bool = handle.get(path)?;
        Ok(!raw)
    });
    let writer: ScalarWriter<bool> =
        Arc::new(|handle, path, value| handle.set(path, !*value));
    (reader, writer)
}

/// Enumeration leaf (`i64`) collapsed to a boolean: variant zero is
/// `false`, everything else `true`.
pub fn enum_as_bool() -> (ScalarReader<bool>, ScalarWriter<bool>) {
    let reader: ScalarReader<bool> = Arc::new(|handle, path| {
        let raw: i64 = handle.get(path)?;
        Ok(raw != 0)
    });
    let writer: ScalarWriter<bool> =
        Arc::new(|handle, path, value| handle.set(path, i64::from(*value)));
    (reader, writer)
}

/// Compensation-mode composite over `<path>/adjust` (bool) and
/// `<path>/type` (enum):
///
/// - `0`: adjust off, unity type
/// - `1`: adjust on, adjusted type
/// - `2`: adjust on, unity type
pub fn mode_pair() -> (ScalarReader<i16>, ScalarWriter<i16>) {
    let reader: ScalarReader<i16> = Arc::new(|handle, path| {
        let enabled: bool = handle.get(&path.join("adjust"))?;
        if !enabled {
            return Ok(0);
        }
        let kind: i64 = handle.get(&path.join("type"))?;
        Ok(if kind == 0 { 2 } else { 1 })
    });
    let writer: ScalarWriter<i16> = Arc::new(|handle, path, value| {
        handle.set(&path.join("adjust"), *value != 0)?;
        handle.set(&path.join("type"), i64::from(*value == 1))
    });
    (reader, writer)
}

/// Minimum over a fixed set of float sub-nodes (e.g. fan speeds), narrowed
/// to `i16`.
pub fn min_of_subnodes(subnodes: &[&str]) -> ScalarReader<i16> {
    let subnodes: Vec<String> = subnodes.iter().map(|s| (*s).to_string()).collect();
    Arc::new(move |handle: &RemoteHandle, path: &RemotePath| -> Result<i16> {
        let mut min = f64::INFINITY;
        for name in &subnodes {
            let value: f64 = handle.get(&path.join(name))?;
            if value < min {
                min = value;
            }
        }
        Ok(saturate_i16(min))
    })
}

/// First element of a spectrum leaf, read and written in place: a write
/// fetches the vector, replaces element zero and stores it back.
pub fn spectrum_first() -> (ScalarReader<i64>, ScalarWriter<i64>) {
    let reader: ScalarReader<i64> = Arc::new(|handle, path| {
        let spectrum: Vec<u32> = handle.get(path)?;
        Ok(spectrum.first().copied().map(i64::from).unwrap_or(0))
    });
    let writer: ScalarWriter<i64> = Arc::new(|handle, path, value| {
        let mut spectrum: Vec<u32> = handle.get(path)?;
        if let Some(first) = spectrum.first_mut() {
            *first = (*value).clamp(0, i64::from(u32::MAX)) as u32;
        }
        handle.set(path, spectrum)
    });
    (reader, writer)
}

/// Writer for read-only derived attributes: any write fails as a node
/// error without touching the registry.
pub fn read_only<T>() -> ScalarWriter<T>
where
    T: Send + Sync + 'static,
{
    Arc::new(|_, path, _| {
        Err(crate::error::SyncError::Node {
            path: path.as_str().to_string(),
            reason: "attribute is read-only".into(),
        })
    })
}

fn saturate_i32(value: f64) -> i32 {
    if value <= f64::from(i32::MIN) {
        i32::MIN
    } else if value >= f64::from(i32::MAX) {
        i32::MAX
    } else {
        value as i32
    }
}

fn saturate_i16(value: f64) -> i16 {
    if value <= f64::from(i16::MIN) {
        i16::MIN
    } else if value >= f64::from(i16::MAX) {
        i16::MAX
    } else {
        value as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Value;
    use crate::sim::SimBackend;

    fn handle_for(backend: SimBackend) -> RemoteHandle {
        let mut handle = RemoteHandle::new(Arc::new(backend), "127.0.0.1");
        handle.connect().unwrap();
        handle
    }

    #[test]
    fn saturation_clamps_at_type_bounds() {
        assert_eq!(saturate_i32(1e12), i32::MAX);
        assert_eq!(saturate_i32(-1e12), i32::MIN);
        assert_eq!(saturate_i32(12.7), 12);
        assert_eq!(saturate_i16(1e6), i16::MAX);
    }

    #[test]
    fn min_of_subnodes_picks_the_smallest() {
        let backend = SimBackend::new();
        backend.set_value("fans/front", Value::Double(1800.0));
        backend.set_value("fans/middle", Value::Double(1500.0));
        backend.set_value("fans/rear", Value::Double(2000.0));
        let handle = handle_for(backend);

        let reader = min_of_subnodes(&["front", "middle", "rear"]);
        assert_eq!(reader(&handle, &RemotePath::new("fans")).unwrap(), 1500);
    }

    #[test]
    fn read_only_writer_rejects_writes() {
        let handle = handle_for(SimBackend::new());
        let writer = read_only::<f64>();
        assert!(writer(&handle, &RemotePath::new("x"), &1.0).is_err());
    }

    #[test]
    fn spectrum_first_rewrites_element_zero_only() {
        let backend = SimBackend::new();
        backend.set_value("cal/table", Value::Spectrum(vec![10, 20, 30]));
        let handle = handle_for(backend.clone());

        let (reader, writer) = spectrum_first();
        assert_eq!(reader(&handle, &RemotePath::new("cal/table")).unwrap(), 10);

        writer(&handle, &RemotePath::new("cal/table"), &99).unwrap();
        assert_eq!(
            backend.value("cal/table"),
            Some(Value::Spectrum(vec![99, 20, 30]))
        );
    }
}
