//! JSON (de)serialization
//!
//! Every dense/sparse matrix and index vector round-trips through a small
//! ASCII text encoding tagged `{"type": "arma::mat" | "arma::sp_mat" |
//! "arma::uvec", "mat": "..."}` — an ASCII encoding picked for
//! round-trippability and readability, shaped after an Armadillo-backed
//! `toJson`/`fromJson` pair without depending on Armadillo's binary format.
//! Components that
//! hold such matrices (`FactorizationCache`, `DesignMatrix`, `DesignData`,
//! `Factory`, `ParameterTracker`) get hand-written `to_json`/`from_json`
//! pairs here instead of a `#[derive(Serialize)]`, since `nalgebra`'s matrix
//! types aren't serde-enabled in this crate's dependency set. Plain-data
//! components (`Loss`, `Optimizer`, `LoggerList`, config structs) already
//! derive `serde::{Serialize, Deserialize}` and are embedded via
//! `serde_json::to_value`/`from_value`.

#![forbid(unsafe_code)]

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::{coo::CooMatrix, csc::CscMatrix};
use serde_json::{json, Value};

use crate::coordinator::Coordinator;
use crate::data::{CacheTag, DesignData, DesignMatrix, FactorizationCache, FeatureSource};
use crate::error::{BoostError, ConfigError};
use crate::factory::{
    CategoricalBinaryFactory, CategoricalRidgeFactory, CenteredFactory, Factory, PSplineFactory,
    PolynomialFactory, TensorFactory,
};
use crate::loss::Loss;
use crate::optimizer::Optimizer;

fn field<'a>(v: &'a Value, name: &str, ctx: &str) -> Result<&'a Value, BoostError> {
    v.get(name).ok_or_else(|| ConfigError::WrongColumnCount { key: format!("{ctx}.{name}"), got: 0, expected: 1 }.into())
}

fn as_str<'a>(v: &'a Value, ctx: &str) -> Result<&'a str, BoostError> {
    v.as_str().ok_or_else(|| ConfigError::WrongColumnCount { key: ctx.to_string(), got: 0, expected: 1 }.into())
}

fn as_f64(v: &Value, ctx: &str) -> Result<f64, BoostError> {
    v.as_f64().ok_or_else(|| ConfigError::WrongColumnCount { key: ctx.to_string(), got: 0, expected: 1 }.into())
}

fn as_u64(v: &Value, ctx: &str) -> Result<u64, BoostError> {
    v.as_u64().ok_or_else(|| ConfigError::WrongColumnCount { key: ctx.to_string(), got: 0, expected: 1 }.into())
}

/// `{"type": "arma::mat", "mat": "<rows>x<cols>\n<row-major floats>"}`.
pub fn mat_to_json(m: &DMatrix<f64>) -> Value {
    let mut body = format!("{}x{}\n", m.nrows(), m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            if j > 0 {
                body.push(' ');
            }
            body.push_str(&format!("{:.17e}", m[(i, j)]));
        }
        body.push('\n');
    }
    json!({ "type": "arma::mat", "mat": body })
}

pub fn mat_from_json(v: &Value) -> Result<DMatrix<f64>, BoostError> {
    let mat = as_str(field(v, "mat", "arma::mat")?, "arma::mat.mat")?;
    let mut lines = mat.lines();
    let shape = lines.next().ok_or_else(|| ConfigError::WrongColumnCount { key: "arma::mat".to_string(), got: 0, expected: 1 })?;
    let (rows, cols) = parse_shape(shape)?;
    let mut out = DMatrix::zeros(rows, cols);
    for i in 0..rows {
        let line = lines.next().unwrap_or("");
        for (j, tok) in line.split_whitespace().enumerate().take(cols) {
            out[(i, j)] = tok.parse::<f64>().unwrap_or(0.0);
        }
    }
    Ok(out)
}

/// `{"type": "arma::sp_mat", "mat": "<rows>x<cols>\n<nnz>\n<row col val>*"}`.
pub fn sp_mat_to_json(m: &CscMatrix<f64>) -> Value {
    let mut triplets: Vec<(usize, usize, f64)> = m.triplet_iter().map(|(r, c, &v)| (r, c, v)).collect();
    triplets.sort_by_key(|&(r, c, _)| (r, c));
    let mut body = format!("{}x{}\n{}\n", m.nrows(), m.ncols(), triplets.len());
    for (r, c, v) in triplets {
        body.push_str(&format!("{r} {c} {:.17e}\n", v));
    }
    json!({ "type": "arma::sp_mat", "mat": body })
}

pub fn sp_mat_from_json(v: &Value) -> Result<CscMatrix<f64>, BoostError> {
    let mat = as_str(field(v, "mat", "arma::sp_mat")?, "arma::sp_mat.mat")?;
    let mut lines = mat.lines();
    let shape = lines.next().ok_or_else(|| ConfigError::WrongColumnCount { key: "arma::sp_mat".to_string(), got: 0, expected: 1 })?;
    let (rows, cols) = parse_shape(shape)?;
    let nnz: usize = lines.next().unwrap_or("0").trim().parse().unwrap_or(0);
    let mut coo = CooMatrix::new(rows, cols);
    for _ in 0..nnz {
        let line = lines.next().unwrap_or("");
        let mut parts = line.split_whitespace();
        let r: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let c: usize = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
        let val: f64 = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0.0);
        coo.push(r, c, val);
    }
    Ok(CscMatrix::from(&coo))
}

/// `{"type": "arma::uvec", "mat": "<len>\n<values>"}`.
pub fn uvec_to_json(v: &[usize]) -> Value {
    let mut body = format!("{}\n", v.len());
    body.push_str(&v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(" "));
    json!({ "type": "arma::uvec", "mat": body })
}

pub fn uvec_from_json(v: &Value) -> Result<Vec<usize>, BoostError> {
    let mat = as_str(field(v, "mat", "arma::uvec")?, "arma::uvec.mat")?;
    let mut lines = mat.lines();
    let len: usize = lines.next().unwrap_or("0").trim().parse().unwrap_or(0);
    let rest = lines.next().unwrap_or("");
    Ok(rest.split_whitespace().take(len).map(|t| t.parse().unwrap_or(0)).collect())
}

fn parse_shape(s: &str) -> Result<(usize, usize), BoostError> {
    let (r, c) = s.split_once('x').ok_or_else(|| ConfigError::WrongColumnCount { key: "shape".to_string(), got: 0, expected: 1 })?;
    Ok((r.trim().parse().unwrap_or(0), c.trim().parse().unwrap_or(0)))
}

fn cache_tag_str(tag: &CacheTag) -> &'static str {
    match tag {
        CacheTag::Identity => "identity",
        CacheTag::Inverse => "inverse",
        CacheTag::Cholesky => "cholesky",
    }
}

fn design_matrix_to_json(d: &DesignMatrix) -> Value {
    match d {
        DesignMatrix::Dense(m) => json!({ "kind": "dense", "matrix": mat_to_json(m) }),
        DesignMatrix::SparseTransposed(m) => json!({ "kind": "sparse_transposed", "matrix": sp_mat_to_json(m) }),
    }
}

fn design_matrix_from_json(v: &Value) -> Result<DesignMatrix, BoostError> {
    match as_str(field(v, "kind", "DesignMatrix")?, "DesignMatrix.kind")? {
        "dense" => Ok(DesignMatrix::Dense(mat_from_json(field(v, "matrix", "DesignMatrix")?)?)),
        "sparse_transposed" => Ok(DesignMatrix::SparseTransposed(sp_mat_from_json(field(v, "matrix", "DesignMatrix")?)?)),
        other => Err(ConfigError::UnknownCacheTag { key: "DesignMatrix.kind".to_string(), tag: other.to_string() }.into()),
    }
}

fn cache_to_json(c: &FactorizationCache) -> Value {
    match c {
        FactorizationCache::IdentityPolynomialSlope { mean_x, sxx } => {
            json!({ "tag": "identity", "variant": "polynomial_slope", "mean_x": mean_x, "sxx": sxx })
        }
        FactorizationCache::IdentityRidgeDiagonal(v) => {
            json!({ "tag": "identity", "variant": "ridge_diagonal", "reciprocals": v.as_slice() })
        }
        FactorizationCache::IdentityBinaryReciprocal(v) => {
            json!({ "tag": "identity", "variant": "binary_reciprocal", "reciprocal": v })
        }
        FactorizationCache::Inverse(m) => json!({ "tag": "inverse", "matrix": mat_to_json(m) }),
        FactorizationCache::Cholesky(r) => json!({ "tag": "cholesky", "matrix": mat_to_json(r) }),
    }
}

fn cache_from_json(v: &Value) -> Result<FactorizationCache, BoostError> {
    let tag = as_str(field(v, "tag", "FactorizationCache")?, "FactorizationCache.tag")?;
    match tag {
        "identity" => match as_str(field(v, "variant", "FactorizationCache")?, "FactorizationCache.variant")? {
            "polynomial_slope" => Ok(FactorizationCache::IdentityPolynomialSlope {
                mean_x: as_f64(field(v, "mean_x", "FactorizationCache")?, "mean_x")?,
                sxx: as_f64(field(v, "sxx", "FactorizationCache")?, "sxx")?,
            }),
            "ridge_diagonal" => {
                let arr = field(v, "reciprocals", "FactorizationCache")?
                    .as_array()
                    .ok_or_else(|| ConfigError::WrongColumnCount { key: "reciprocals".to_string(), got: 0, expected: 1 })?;
                let values: Vec<f64> = arr.iter().filter_map(|x| x.as_f64()).collect();
                Ok(FactorizationCache::IdentityRidgeDiagonal(DVector::from_vec(values)))
            }
            "binary_reciprocal" => Ok(FactorizationCache::IdentityBinaryReciprocal(as_f64(
                field(v, "reciprocal", "FactorizationCache")?,
                "reciprocal",
            )?)),
            other => Err(ConfigError::UnknownCacheTag { key: "FactorizationCache.variant".to_string(), tag: other.to_string() }.into()),
        },
        "inverse" => Ok(FactorizationCache::Inverse(mat_from_json(field(v, "matrix", "FactorizationCache")?)?)),
        "cholesky" => Ok(FactorizationCache::Cholesky(mat_from_json(field(v, "matrix", "FactorizationCache")?)?)),
        other => Err(ConfigError::UnknownCacheTag { key: "FactorizationCache.tag".to_string(), tag: other.to_string() }.into()),
    }
}

fn design_data_to_json(d: &DesignData) -> Value {
    json!({
        "design": design_matrix_to_json(&d.design),
        "penalty": d.penalty.as_ref().map(mat_to_json),
        "binning_index": d.binning_index.as_deref().map(uvec_to_json),
        "cache": cache_to_json(&d.cache),
    })
}

fn design_data_from_json(v: &Value) -> Result<DesignData, BoostError> {
    let penalty = match v.get("penalty") {
        Some(Value::Null) | None => None,
        Some(p) => Some(mat_from_json(p)?),
    };
    let binning_index = match v.get("binning_index") {
        Some(Value::Null) | None => None,
        Some(b) => Some(uvec_from_json(b)?),
    };
    Ok(DesignData {
        design: design_matrix_from_json(field(v, "design", "DesignData")?)?,
        penalty,
        binning_index,
        cache: cache_from_json(field(v, "cache", "DesignData")?)?,
    })
}

fn cache_tag_from_str(key: &str, tag: &str) -> Result<CacheTag, ConfigError> {
    match tag {
        "identity" => Ok(CacheTag::Identity),
        "inverse" => Ok(CacheTag::Inverse),
        "cholesky" => Ok(CacheTag::Cholesky),
        other => Err(ConfigError::UnknownCacheTag { key: key.to_string(), tag: other.to_string() }),
    }
}

/// Recursive `Factory` serialization: each variant's `Class` tag plus its
/// type-specific attributes (degree, knots, dictionary, child factories,
/// ...) and its `DesignData`, so the factory is fully reconstructable
/// without re-reading the original `FeatureSource` (needed for `predict`,
/// which only ever sees accumulated coefficients, not training data).
pub fn factory_to_json(f: &Factory) -> Value {
    match f {
        Factory::Polynomial(p) => json!({
            "Class": "PolynomialFactory",
            "data_id": p.data_id,
            "degree": p.degree,
            "intercept": p.intercept,
            "bin_root": p.bin_root,
            "design": design_data_to_json(&p.design),
        }),
        Factory::PSpline(p) => json!({
            "Class": "PSplineFactory",
            "data_id": p.data_id,
            "degree": p.degree,
            "n_knots": p.n_knots,
            "differences": p.differences,
            "bin_root": p.bin_root,
            "knot_vec": p.knot_vec,
            "lambda": p.lambda,
            "preferred_tag": cache_tag_str(&p.preferred_tag),
            "design": design_data_to_json(&p.design),
        }),
        Factory::CategoricalRidge(p) => json!({
            "Class": "CategoricalRidgeFactory",
            "data_id": p.data_id,
            "target_df": p.target_df,
            "lambda": p.lambda,
            "dictionary": p.dictionary,
            "design": design_data_to_json(&p.design),
        }),
        Factory::CategoricalBinary(p) => json!({
            "Class": "CategoricalBinaryFactory",
            "data_id": p.data_id,
            "class_label": p.class_label,
            "design": design_data_to_json(&p.design),
        }),
        Factory::Tensor(p) => json!({
            "Class": "TensorFactory",
            "child1": factory_to_json(&p.child1),
            "child2": factory_to_json(&p.child2),
            "design": design_data_to_json(&p.design),
        }),
        Factory::Centered(p) => json!({
            "Class": "CenteredFactory",
            "child1": factory_to_json(&p.child1),
            "child2": factory_to_json(&p.child2),
            "rotation": mat_to_json(&p.rotation),
            "design": design_data_to_json(&p.design),
        }),
    }
}

pub fn factory_from_json(v: &Value) -> Result<Factory, BoostError> {
    let class = as_str(field(v, "Class", "Factory")?, "Factory.Class")?;
    match class {
        "PolynomialFactory" => Ok(Factory::Polynomial(PolynomialFactory {
            data_id: as_str(field(v, "data_id", "Factory")?, "data_id")?.to_string(),
            degree: as_u64(field(v, "degree", "Factory")?, "degree")? as usize,
            intercept: field(v, "intercept", "Factory")?.as_bool().unwrap_or(false),
            bin_root: as_u64(field(v, "bin_root", "Factory")?, "bin_root")? as usize,
            design: design_data_from_json(field(v, "design", "Factory")?)?,
        })),
        "PSplineFactory" => {
            let knot_vec: Vec<f64> = field(v, "knot_vec", "Factory")?
                .as_array()
                .ok_or_else(|| ConfigError::WrongColumnCount { key: "knot_vec".to_string(), got: 0, expected: 1 })?
                .iter()
                .filter_map(|x| x.as_f64())
                .collect();
            let tag_str = as_str(field(v, "preferred_tag", "Factory")?, "preferred_tag")?;
            Ok(Factory::PSpline(PSplineFactory {
                data_id: as_str(field(v, "data_id", "Factory")?, "data_id")?.to_string(),
                degree: as_u64(field(v, "degree", "Factory")?, "degree")? as usize,
                n_knots: as_u64(field(v, "n_knots", "Factory")?, "n_knots")? as usize,
                differences: as_u64(field(v, "differences", "Factory")?, "differences")? as usize,
                bin_root: as_u64(field(v, "bin_root", "Factory")?, "bin_root")? as usize,
                knot_vec,
                lambda: as_f64(field(v, "lambda", "Factory")?, "lambda")?,
                preferred_tag: cache_tag_from_str("preferred_tag", tag_str)?,
                design: design_data_from_json(field(v, "design", "Factory")?)?,
            }))
        }
        "CategoricalRidgeFactory" => {
            let dictionary: HashMap<String, usize> = serde_json::from_value(field(v, "dictionary", "Factory")?.clone())
                .map_err(|_| ConfigError::WrongColumnCount { key: "dictionary".to_string(), got: 0, expected: 1 })?;
            let target_df = field(v, "target_df", "Factory")?.as_f64();
            Ok(Factory::CategoricalRidge(CategoricalRidgeFactory {
                data_id: as_str(field(v, "data_id", "Factory")?, "data_id")?.to_string(),
                target_df,
                lambda: as_f64(field(v, "lambda", "Factory")?, "lambda")?,
                dictionary,
                design: design_data_from_json(field(v, "design", "Factory")?)?,
            }))
        }
        "CategoricalBinaryFactory" => Ok(Factory::CategoricalBinary(CategoricalBinaryFactory {
            data_id: as_str(field(v, "data_id", "Factory")?, "data_id")?.to_string(),
            class_label: as_str(field(v, "class_label", "Factory")?, "class_label")?.to_string(),
            design: design_data_from_json(field(v, "design", "Factory")?)?,
        })),
        "TensorFactory" => Ok(Factory::Tensor(TensorFactory {
            child1: Box::new(factory_from_json(field(v, "child1", "Factory")?)?),
            child2: Box::new(factory_from_json(field(v, "child2", "Factory")?)?),
            design: design_data_from_json(field(v, "design", "Factory")?)?,
        })),
        "CenteredFactory" => Ok(Factory::Centered(CenteredFactory {
            child1: Box::new(factory_from_json(field(v, "child1", "Factory")?)?),
            child2: Box::new(factory_from_json(field(v, "child2", "Factory")?)?),
            rotation: mat_from_json(field(v, "rotation", "Factory")?)?,
            design: design_data_from_json(field(v, "design", "Factory")?)?,
        })),
        other => Err(ConfigError::UnknownCacheTag { key: "Factory.Class".to_string(), tag: other.to_string() }.into()),
    }
}

/// The tracker's log is private; the coordinator serializes it via
/// [`Coordinator::tracker_entries_for_json`] instead of reaching in here.
pub fn tracker_entries_to_json(entries: &[(String, Vec<f64>)]) -> Value {
    json!(entries
        .iter()
        .map(|(key, delta)| json!({ "key": key, "delta": delta }))
        .collect::<Vec<_>>())
}

pub fn tracker_entries_from_json(v: &Value) -> Result<Vec<(String, DVector<f64>)>, BoostError> {
    let arr = v.as_array().ok_or_else(|| ConfigError::WrongColumnCount { key: "tracker".to_string(), got: 0, expected: 1 })?;
    let mut out = Vec::with_capacity(arr.len());
    for entry in arr {
        let key = as_str(field(entry, "key", "tracker entry")?, "key")?.to_string();
        let delta: Vec<f64> = field(entry, "delta", "tracker entry")?
            .as_array()
            .ok_or_else(|| ConfigError::WrongColumnCount { key: "delta".to_string(), got: 0, expected: 1 })?
            .iter()
            .filter_map(|x| x.as_f64())
            .collect();
        out.push((key, DVector::from_vec(delta)));
    }
    Ok(out)
}

/// Top-level model serialization: `{"Class": "Coordinator", ...}` bundling
/// the loss/optimizer/logger-list (already `serde`-derived), the factory
/// registry and parameter tracker (hand-encoded above), and the scalar fit
/// state (`nu`, `stop_if_all`, `current_iter`, `f0`, `task`).
pub fn coordinator_to_json(c: &Coordinator) -> Value {
    json!({
        "Class": "Coordinator",
        "nu": c.nu,
        "stop_if_all": c.stop_if_all,
        "current_iter": c.current_iter,
        "f0": c.response.f0,
        "task": serde_json::to_value(c.response.task).unwrap(),
        "loss": serde_json::to_value(&c.loss).unwrap(),
        "optimizer": serde_json::to_value(c.optimizer).unwrap(),
        "loggers": serde_json::to_value(&c.loggers).unwrap(),
        "risk_history": c.risk_history,
        "factories": c.factories.iter().map(factory_to_json).collect::<Vec<_>>(),
        "tracker": tracker_entries_to_json(&c.tracker_entries_for_json()),
    })
}

pub fn coordinator_from_json(v: &Value) -> Result<Coordinator, BoostError> {
    let nu = as_f64(field(v, "nu", "Coordinator")?, "nu")?;
    let stop_if_all = field(v, "stop_if_all", "Coordinator")?.as_bool().unwrap_or(false);
    let current_iter = as_u64(field(v, "current_iter", "Coordinator")?, "current_iter")? as usize;
    let f0 = as_f64(field(v, "f0", "Coordinator")?, "f0")?;
    let task = serde_json::from_value(field(v, "task", "Coordinator")?.clone())
        .map_err(|_| ConfigError::WrongColumnCount { key: "task".to_string(), got: 0, expected: 1 })?;
    let loss: Loss = serde_json::from_value(field(v, "loss", "Coordinator")?.clone())
        .map_err(|_| ConfigError::WrongColumnCount { key: "loss".to_string(), got: 0, expected: 1 })?;
    let optimizer: Optimizer = serde_json::from_value(field(v, "optimizer", "Coordinator")?.clone())
        .map_err(|_| ConfigError::WrongColumnCount { key: "optimizer".to_string(), got: 0, expected: 1 })?;
    let loggers = serde_json::from_value(field(v, "loggers", "Coordinator")?.clone())
        .map_err(|_| ConfigError::WrongColumnCount { key: "loggers".to_string(), got: 0, expected: 1 })?;
    let risk_history: Vec<f64> = field(v, "risk_history", "Coordinator")?
        .as_array()
        .ok_or_else(|| ConfigError::WrongColumnCount { key: "risk_history".to_string(), got: 0, expected: 1 })?
        .iter()
        .filter_map(|x| x.as_f64())
        .collect();
    let factories: Vec<Factory> = field(v, "factories", "Coordinator")?
        .as_array()
        .ok_or_else(|| ConfigError::WrongColumnCount { key: "factories".to_string(), got: 0, expected: 1 })?
        .iter()
        .map(factory_from_json)
        .collect::<Result<Vec<_>, _>>()?;
    let tracker_entries = tracker_entries_from_json(field(v, "tracker", "Coordinator")?)?;

    Ok(Coordinator::from_parts(nu, stop_if_all, current_iter, f0, task, loss, optimizer, loggers, risk_history, factories, tracker_entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dense_matrix_round_trips() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let v = mat_to_json(&m);
        let back = mat_from_json(&v).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn sparse_matrix_round_trips() {
        let mut coo = CooMatrix::new(3, 2);
        coo.push(0, 0, 1.0);
        coo.push(2, 1, 4.5);
        let m = CscMatrix::from(&coo);
        let v = sp_mat_to_json(&m);
        let back = sp_mat_from_json(&v).unwrap();
        assert_eq!(m.nrows(), back.nrows());
        assert_eq!(m.ncols(), back.ncols());
        assert_eq!(m.nnz(), back.nnz());
    }

    #[test]
    fn uvec_round_trips() {
        let bin = vec![0usize, 1, 1, 2, 0];
        let v = uvec_to_json(&bin);
        let back = uvec_from_json(&v).unwrap();
        assert_eq!(bin, back);
    }
}
