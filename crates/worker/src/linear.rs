//! Reference trainer: a dense linear layer fitted with mini-batch gradient
//! descent.
//!
//! Weights follow the usual dense-layer layout, `[kernel (in x out), bias (out)]`.
//! An empty `weights` list starts from zeros. The trained weights keep the
//! dtype of the supplied kernel (or of `x_train` when starting from zeros).

use ndarray::{s, Array, Array1, Array2, Axis, Dimension, Zip};
use trainq_core::serialization::{encode_model, ArrayData, DType, ModelDocument, NdArray};
use trainq_core::training::{ProgressSink, Trainable, TrainingError, TrainingRequest};

/// Loss functions understood by [`LinearRegressionTrainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    MeanSquaredError,
    MeanAbsoluteError,
}

impl Loss {
    pub fn parse(name: &str) -> Result<Self, TrainingError> {
        match name {
            "mse" | "mean_squared_error" => Ok(Self::MeanSquaredError),
            "mae" | "mean_absolute_error" => Ok(Self::MeanAbsoluteError),
            other => Err(TrainingError::UnsupportedLoss(other.to_string())),
        }
    }

    /// Gradient of the mean loss with respect to the predictions.
    fn gradient(self, diff: &Array2<f64>) -> Array2<f64> {
        let n = diff.len().max(1) as f64;
        match self {
            Self::MeanSquaredError => diff.mapv(|d| 2.0 * d / n),
            Self::MeanAbsoluteError => diff.mapv(|d| if d == 0.0 { 0.0 } else { d.signum() / n }),
        }
    }
}

/// Optimizers understood by [`LinearRegressionTrainer`], with their
/// default hyper-parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Optimizer {
    Sgd { learning_rate: f64 },
    RmsProp { learning_rate: f64, rho: f64, epsilon: f64 },
}

impl Optimizer {
    pub fn parse(name: &str) -> Result<Self, TrainingError> {
        match name {
            "sgd" => Ok(Self::Sgd { learning_rate: 0.01 }),
            "rmsprop" => Ok(Self::RmsProp {
                learning_rate: 0.001,
                rho: 0.9,
                epsilon: 1e-7,
            }),
            other => Err(TrainingError::UnsupportedOptimizer(other.to_string())),
        }
    }

    fn step<D: Dimension>(self, param: &mut Array<f64, D>, grad: &Array<f64, D>, cache: &mut Array<f64, D>) {
        match self {
            Self::Sgd { learning_rate } => param.scaled_add(-learning_rate, grad),
            Self::RmsProp {
                learning_rate,
                rho,
                epsilon,
            } => {
                Zip::from(param).and(grad).and(cache).for_each(|p, &g, c| {
                    *c = rho * *c + (1.0 - rho) * g * g;
                    *p -= learning_rate * g / (c.sqrt() + epsilon);
                });
            }
        }
    }
}

/// Fits `y = x . kernel + bias`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinearRegressionTrainer;

impl Trainable for LinearRegressionTrainer {
    fn train(
        &self,
        request: &TrainingRequest,
        progress: &mut dyn ProgressSink,
    ) -> Result<ModelDocument, TrainingError> {
        let loss = Loss::parse(&request.loss)?;
        let optimizer = Optimizer::parse(&request.optimizer)?;

        let x_train = request.x_train_array()?;
        let y_train = request.y_train_array()?;
        let x = as_matrix(&x_train, "x_train")?;
        let y = as_matrix(&y_train, "y_train")?;
        if x.nrows() != y.nrows() {
            return Err(TrainingError::IncompatibleShapes(format!(
                "x_train has {} samples but y_train has {}",
                x.nrows(),
                y.nrows()
            )));
        }
        let (inputs, outputs) = (x.ncols(), y.ncols());

        let weights = request.weight_arrays()?;
        let (mut kernel, mut bias, dtype) = initial_weights(&weights, inputs, outputs, x_train.dtype())?;
        let mut kernel_cache = Array2::<f64>::zeros(kernel.raw_dim());
        let mut bias_cache = Array1::<f64>::zeros(bias.raw_dim());

        let samples = x.nrows();
        let batch_size = usize::try_from(request.batch_size)
            .unwrap_or(usize::MAX)
            .clamp(1, samples.max(1));
        let epochs = u64::try_from(request.epochs).unwrap_or(0);

        for epoch in 0..epochs {
            progress.on_epoch_begin(epoch);
            for start in (0..samples).step_by(batch_size) {
                let end = (start + batch_size).min(samples);
                let xb = x.slice(s![start..end, ..]);
                let yb = y.slice(s![start..end, ..]);

                let diff = xb.dot(&kernel) + &bias - yb;
                let grad = loss.gradient(&diff);
                let kernel_grad = xb.t().dot(&grad);
                let bias_grad = grad.sum_axis(Axis(0));

                optimizer.step(&mut kernel, &kernel_grad, &mut kernel_cache);
                optimizer.step(&mut bias, &bias_grad, &mut bias_cache);
                progress.on_batch_end((end - start) as u64);
            }
            progress.on_epoch_end(epoch);

            if !kernel.iter().chain(bias.iter()).all(|w| w.is_finite()) {
                return Err(TrainingError::Diverged(format!(
                    "non-finite weights after epoch {}",
                    epoch + 1
                )));
            }
        }

        let kernel = to_nd_array(vec![inputs, outputs], kernel.iter().copied(), dtype)?;
        let bias = to_nd_array(vec![outputs], bias.iter().copied(), dtype)?;
        Ok(encode_model(request.architecture.clone(), &[kernel, bias]))
    }
}

/// View a 1-D array as a column and a 2-D array as-is.
fn as_matrix(array: &NdArray, name: &str) -> Result<Array2<f64>, TrainingError> {
    let (rows, cols) = match *array.shape() {
        [rows] => (rows, 1),
        [rows, cols] => (rows, cols),
        ref shape => {
            return Err(TrainingError::IncompatibleShapes(format!(
                "{name} must be 1-D or 2-D, got shape {shape:?}"
            )))
        }
    };
    Array2::from_shape_vec((rows, cols), array.to_f64_vec())
        .map_err(|e| TrainingError::IncompatibleShapes(format!("{name}: {e}")))
}

fn initial_weights(
    weights: &[NdArray],
    inputs: usize,
    outputs: usize,
    input_dtype: DType,
) -> Result<(Array2<f64>, Array1<f64>, DType), TrainingError> {
    match weights {
        [] => {
            let dtype = if input_dtype == DType::F32 { DType::F32 } else { DType::F64 };
            Ok((Array2::zeros((inputs, outputs)), Array1::zeros(outputs), dtype))
        }
        [kernel, bias] => {
            if kernel.shape() != [inputs, outputs] || bias.shape() != [outputs] {
                return Err(TrainingError::IncompatibleShapes(format!(
                    "expected kernel {:?} and bias {:?}, got {:?} and {:?}",
                    [inputs, outputs],
                    [outputs],
                    kernel.shape(),
                    bias.shape()
                )));
            }
            let dtype = if kernel.dtype() == DType::F32 { DType::F32 } else { DType::F64 };
            let kernel = Array2::from_shape_vec((inputs, outputs), kernel.to_f64_vec())
                .map_err(|e| TrainingError::IncompatibleShapes(e.to_string()))?;
            Ok((kernel, Array1::from(bias.to_f64_vec()), dtype))
        }
        other => Err(TrainingError::IncompatibleShapes(format!(
            "a linear model takes a kernel and a bias, got {} weight arrays",
            other.len()
        ))),
    }
}

fn to_nd_array(
    shape: Vec<usize>,
    values: impl Iterator<Item = f64>,
    dtype: DType,
) -> Result<NdArray, TrainingError> {
    let data = match dtype {
        DType::F32 => ArrayData::F32(values.map(|v| v as f32).collect()),
        _ => ArrayData::F64(values.collect()),
    };
    Ok(NdArray::new(shape, data)?)
}
