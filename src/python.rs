use crate::config::DashboardConfig;
use crate::core::animation::LogObserver;
use crate::core::{Dashboard, Query};
use crate::io::raster::RasterReader;
use crate::types::{ErrorKind, No2Error};
use chrono::NaiveDate;
use numpy::{IntoPyArray, PyArray2};
use pyo3::prelude::*;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyDashboard>()?;
    m.add_function(wrap_pyfunction!(read_raster, m)?)?;
    Ok(())
}

fn to_py_err(err: No2Error) -> PyErr {
    match err.kind() {
        ErrorKind::InvalidQuery | ErrorKind::DateOutOfRange => {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(err.to_string())
        }
        _ => PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(err.to_string()),
    }
}

fn parse_date(raw: &str) -> PyResult<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|e| {
        PyErr::new::<pyo3::exceptions::PyValueError, _>(format!("Invalid date '{}': {}", raw, e))
    })
}

/// Read band 1 of a GeoTIFF as a float32 array, no data as NaN
#[pyfunction]
fn read_raster<'py>(py: Python<'py>, path: String) -> PyResult<&'py PyArray2<f32>> {
    let values = RasterReader::read_geotiff(&path).map_err(to_py_err)?;
    Ok(values.into_pyarray(py))
}

/// Python wrapper for Dashboard
#[pyclass(name = "Dashboard")]
struct PyDashboard {
    inner: Dashboard,
}

impl PyDashboard {
    fn query(
        &self,
        bbox: (f64, f64, f64, f64),
        start: &str,
        end: &str,
        cloud_threshold: f32,
    ) -> PyResult<Query> {
        let (west, south, east, north) = bbox;
        self.inner
            .query_builder()
            .bbox(west, south, east, north)
            .dates(parse_date(start)?, parse_date(end)?)
            .cloud_threshold(cloud_threshold)
            .build()
            .map_err(to_py_err)
    }
}

#[pymethods]
impl PyDashboard {
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<String>) -> PyResult<Self> {
        let config = DashboardConfig::load(config_path.as_deref().map(Path::new)).map_err(to_py_err)?;
        let inner = Dashboard::connect(config).map_err(to_py_err)?;
        Ok(PyDashboard { inner })
    }

    /// Aligned table as a JSON array of rows
    #[pyo3(signature = (bbox, start, end, cloud_threshold=0.5))]
    fn time_series(
        &self,
        py: Python<'_>,
        bbox: (f64, f64, f64, f64),
        start: &str,
        end: &str,
        cloud_threshold: f32,
    ) -> PyResult<String> {
        let query = self.query(bbox, start, end, cloud_threshold)?;
        let table = py
            .allow_threads(|| self.inner.time_series(&query))
            .map_err(to_py_err)?;
        table.to_json().map_err(to_py_err)
    }

    /// Path of the rendered PNG
    #[pyo3(signature = (bbox, start, end, date, cloud_threshold=0.5))]
    fn snapshot(
        &self,
        py: Python<'_>,
        bbox: (f64, f64, f64, f64),
        start: &str,
        end: &str,
        date: &str,
        cloud_threshold: f32,
    ) -> PyResult<String> {
        let query = self.query(bbox, start, end, cloud_threshold)?;
        let target = parse_date(date)?;
        let result = py
            .allow_threads(|| self.inner.snapshot(&query, target))
            .map_err(to_py_err)?;
        Ok(result.path.display().to_string())
    }

    /// Path of the GIF
    #[pyo3(signature = (bbox, start, end, fps=None, cloud_threshold=0.5))]
    fn animate(
        &self,
        py: Python<'_>,
        bbox: (f64, f64, f64, f64),
        start: &str,
        end: &str,
        fps: Option<u32>,
        cloud_threshold: f32,
    ) -> PyResult<String> {
        let query = self.query(bbox, start, end, cloud_threshold)?;
        let cancel = Arc::new(AtomicBool::new(false));
        let result = py
            .allow_threads(|| self.inner.animate(&query, fps, &LogObserver, &cancel))
            .map_err(to_py_err)?;
        Ok(result.path.display().to_string())
    }

    fn __repr__(&self) -> String {
        format!("Dashboard(backend='{}')", self.inner.backend().name())
    }
}
