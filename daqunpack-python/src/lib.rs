//! Python bindings for the daqunpack decoder with numpy column access.
//!
//! Decoded hits are returned in columnar form (one numpy array per field),
//! which maps directly onto pandas DataFrames and numpy structured arrays.

use daqunpack_core::ring::words_from_le_bytes;
use daqunpack_core::types::hits;
use daqunpack_core::{EventAssembler, Hit, RingReader, UnpackConfig};
use numpy::{IntoPyArray, PyArray1};
use pyo3::exceptions::{PyIOError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

/// Container for decoded hits.
///
/// Each field is stored as a separate column.
#[pyclass]
pub struct Hits {
    /// Physics event index within the run
    event: Vec<u64>,
    /// Family code: 0 = conversion, 1 = timing
    family: Vec<u8>,
    /// Module selector (geo address / module id)
    selector: Vec<u16>,
    /// Channel number (0-31)
    channel: Vec<u8>,
    /// Raw value
    value: Vec<u16>,
    /// Whether the module block decoded without defects
    valid: Vec<bool>,
    /// Number of physics events scanned
    n_events: u64,
}

#[pymethods]
impl Hits {
    /// Returns the number of hits.
    fn __len__(&self) -> usize {
        self.value.len()
    }

    fn __repr__(&self) -> String {
        format!("Hits(count={}, events={})", self.value.len(), self.n_events)
    }

    /// Returns the physics event index of each hit.
    #[getter]
    fn event<'py>(&self, py: Python<'py>) -> &'py PyArray1<u64> {
        self.event.clone().into_pyarray(py)
    }

    /// Returns the family code of each hit (0 = conversion, 1 = timing).
    #[getter]
    fn family<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.family.clone().into_pyarray(py)
    }

    #[getter]
    fn selector<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.selector.clone().into_pyarray(py)
    }

    #[getter]
    fn channel<'py>(&self, py: Python<'py>) -> &'py PyArray1<u8> {
        self.channel.clone().into_pyarray(py)
    }

    #[getter]
    fn value<'py>(&self, py: Python<'py>) -> &'py PyArray1<u16> {
        self.value.clone().into_pyarray(py)
    }

    #[getter]
    fn valid<'py>(&self, py: Python<'py>) -> &'py PyArray1<bool> {
        self.valid.clone().into_pyarray(py)
    }

    /// Returns the number of physics events that were scanned.
    #[getter]
    fn n_events(&self) -> u64 {
        self.n_events
    }

    /// Returns all arrays as a dictionary.
    ///
    /// This is useful for creating a pandas DataFrame.
    fn to_dict<'py>(&self, py: Python<'py>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        dict.set_item("event", self.event.clone().into_pyarray(py))?;
        dict.set_item("family", self.family.clone().into_pyarray(py))?;
        dict.set_item("selector", self.selector.clone().into_pyarray(py))?;
        dict.set_item("channel", self.channel.clone().into_pyarray(py))?;
        dict.set_item("value", self.value.clone().into_pyarray(py))?;
        dict.set_item("valid", self.valid.clone().into_pyarray(py))?;
        Ok(dict.into())
    }
}

impl Hits {
    fn new() -> Self {
        Self {
            event: Vec::new(),
            family: Vec::new(),
            selector: Vec::new(),
            channel: Vec::new(),
            value: Vec::new(),
            valid: Vec::new(),
            n_events: 0,
        }
    }

    fn push(&mut self, hit: Hit) {
        self.event.push(hit.event);
        self.family.push(hit.family as u8);
        self.selector.push(hit.selector);
        self.channel.push(hit.channel);
        self.value.push(hit.value);
        self.valid.push(hit.valid);
    }

    /// Scans one physics buffer and appends its hits.
    fn scan(&mut self, assembler: &EventAssembler, words: &[u16]) {
        let blocks = assembler.scan(words);
        for hit in hits(self.n_events, &blocks) {
            self.push(hit);
        }
        self.n_events += 1;
    }
}

fn load_assembler(config_path: &str) -> PyResult<EventAssembler> {
    let config = UnpackConfig::from_file(config_path)
        .map_err(|e| PyValueError::new_err(format!("Failed to load configuration: {}", e)))?;
    config
        .build_assembler()
        .map_err(|e| PyValueError::new_err(format!("Invalid configuration: {}", e)))
}

/// Unpacks every physics event of an NSCLDAQ run file.
///
/// Args:
///     path: Path to the .evt run file
///     config: Path to the TOML deployment configuration
///
/// Returns:
///     Hits: Container with event, family, selector, channel, value and valid arrays
///
/// Example:
///     >>> import daqunpack
///     >>> hits = daqunpack.decode_file("run-0042-00.evt", "unpack.toml")
///     >>> adc3 = hits.value[(hits.family == 0) & (hits.selector == 5)]
#[pyfunction]
fn decode_file(py: Python<'_>, path: &str, config: &str) -> PyResult<Py<Hits>> {
    let assembler = load_assembler(config)?;
    let reader = RingReader::open(path)
        .map_err(|e| PyIOError::new_err(format!("Failed to open run file: {}", e)))?;

    let mut result = Hits::new();
    for item in reader {
        let item = item.map_err(|e| PyIOError::new_err(format!("Failed to read run file: {}", e)))?;
        if let Some(words) = item.physics_words() {
            result.scan(&assembler, &words);
        }
    }

    Py::new(py, result)
}

/// Unpacks a single physics buffer given as raw little-endian bytes.
///
/// The bytes must already be stripped of ring-item framing and of the
/// leading word count. An odd number of bytes raises ValueError.
///
/// Args:
///     data: Raw bytes containing 16-bit module data words
///     config: Path to the TOML deployment configuration
///
/// Returns:
///     Hits: Container with the decoded hits of this one event
#[pyfunction]
fn decode_bytes(py: Python<'_>, data: &[u8], config: &str) -> PyResult<Py<Hits>> {
    let assembler = load_assembler(config)?;

    let words = words_from_le_bytes(data).map_err(|e| PyValueError::new_err(e.to_string()))?;

    let mut result = Hits::new();
    result.scan(&assembler, &words);
    Py::new(py, result)
}

/// daqunpack module for Python.
#[pymodule]
fn _daqunpack(_py: Python<'_>, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(decode_file, m)?)?;
    m.add_function(wrap_pyfunction!(decode_bytes, m)?)?;
    m.add_class::<Hits>()?;
    Ok(())
}
