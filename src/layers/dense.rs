use std::time::Instant;

use log::{debug, info, trace, warn};
use ndarray::{
    ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis,
    linalg::{general_mat_mul, general_mat_vec_mul},
    s,
};

use super::{DeviceHint, Layer, ShardPlan};
use crate::{
    EngineConfig, EngineErr, HostBuffer, Input, Mac, MemPool, PoolBuf, Result, Shape4, Tag,
    Tensor,
};

/// Weights streamed from untrusted memory one authenticated shard at a time.
#[derive(Debug)]
struct ShardedWeights {
    host: HostBuffer,
    plan: ShardPlan,
    mac: Mac,
    tags: Box<[Tag]>,
}

#[derive(Debug)]
enum Weights<'p> {
    Resident(PoolBuf<'p, f32>),
    Sharded(ShardedWeights),
}

/// A fully connected layer computing `y = x · W + b` inside the enclave.
///
/// `W` is a row-major `h_in × h_out` matrix. When it's too large for the enclave it stays in
/// host memory and each forward pass streams it in MAC-verified row shards, accumulating the
/// partial products. The bias is always resident.
#[derive(Debug)]
pub struct Dense<'p> {
    name: String,
    input_shape: Shape4,
    h_in: usize,
    h_out: usize,
    weights: Weights<'p>,
    bias: PoolBuf<'p, f32>,
    pool: &'p MemPool,
    output_shape: Shape4,
    last_batch: Option<usize>,
}

impl<'p> Dense<'p> {
    /// Creates a new `Dense` layer, deciding once whether its weights are sharded.
    ///
    /// # Arguments
    /// * `name` - A diagnostic name.
    /// * `input_shape` - The shape of the expected input, informative only.
    /// * `dim` - The `(h_in, h_out)` dimensions of the weight matrix.
    /// * `weights` - The row-major weights in host memory.
    /// * `bias` - The `h_out` biases.
    /// * `pool` - The enclave arena every buffer of this layer is taken from.
    /// * `config` - The engine configuration.
    ///
    /// # Returns
    /// The layer, or a configuration or allocation error. A failed construction leaves
    /// nothing allocated.
    pub fn new(
        name: impl Into<String>,
        input_shape: Shape4,
        dim: (usize, usize),
        weights: &HostBuffer,
        bias: &[f32],
        pool: &'p MemPool,
        config: &EngineConfig,
    ) -> Result<Self> {
        let name = name.into();
        let (h_in, h_out) = dim;

        if h_in == 0 || h_out == 0 {
            return Err(EngineErr::InvalidConfig(format!(
                "layer {name} has an empty weight matrix ({h_in} x {h_out})"
            )));
        }

        let params = h_in.checked_mul(h_out).ok_or_else(|| {
            EngineErr::InvalidConfig(format!("layer {name} is too large ({h_in} x {h_out})"))
        })?;

        if weights.len() != params {
            return Err(EngineErr::SizeMismatch {
                what: "weights",
                got: weights.len(),
                expected: params,
            });
        }

        if bias.len() != h_out {
            return Err(EngineErr::SizeMismatch {
                what: "bias",
                got: bias.len(),
                expected: h_out,
            });
        }

        let sharded = config.should_shard(params);
        let weights = if sharded {
            let plan = ShardPlan::new(h_in, h_out, config.shard_factor)?;
            let mac = Mac::random();
            let tags = record_tags(pool, weights, &plan, &mac)?;

            Weights::Sharded(ShardedWeights {
                host: weights.clone(),
                plan,
                mac,
                tags,
            })
        } else {
            let mut resident = pool.alloc::<f32>(params)?;
            weights.copy_range(0..params, &mut resident)?;
            Weights::Resident(resident)
        };

        let bias = pool.alloc_copy(bias)?;

        info!(
            layer = name.as_str(), h_in = h_in, h_out = h_out, sharded = sharded;
            "dense layer ready"
        );

        Ok(Self {
            name,
            input_shape,
            h_in,
            h_out,
            weights,
            bias,
            pool,
            output_shape: [1, 1, 0, h_out],
            last_batch: None,
        })
    }

    /// Returns the `(rows, cols)` dimensions of the weight matrix.
    pub fn kernel_dimensions(&self) -> (usize, usize) {
        (self.h_in, self.h_out)
    }

    /// Returns the shape of the input this layer was declared with.
    pub fn input_shape(&self) -> Shape4 {
        self.input_shape
    }

    /// Returns whether the weights are streamed from host memory.
    pub fn is_sharded(&self) -> bool {
        matches!(self.weights, Weights::Sharded(_))
    }

    /// Returns how the weights are split, if they're sharded.
    pub fn shard_plan(&self) -> Option<ShardPlan> {
        match &self.weights {
            Weights::Sharded(sharded) => Some(sharded.plan),
            Weights::Resident(_) => None,
        }
    }

    /// Returns the biases.
    pub fn bias(&self) -> &[f32] {
        &self.bias
    }

    /// Returns a copy of the current weights.
    ///
    /// For sharded layers this reads host memory as is, without authenticating it.
    pub fn weights_snapshot(&self) -> Vec<f32> {
        match &self.weights {
            Weights::Resident(w) => w.to_vec(),
            Weights::Sharded(sharded) => sharded.host.snapshot(),
        }
    }

    /// Computes `x · W` shard by shard, authenticating each shard before it's used.
    fn sharded_product(
        &self,
        sharded: &ShardedWeights,
        x: ArrayView2<f32>,
        y: &mut ArrayViewMut2<f32>,
    ) -> Result<()> {
        let plan = sharded.plan;
        let mut shard = self.pool.alloc::<f32>(plan.shard_len())?;

        for (i, expected) in sharded.tags.iter().enumerate() {
            sharded.host.copy_range(plan.elements(i), &mut shard)?;

            if !sharded.mac.verify(shard.as_bytes(), expected) {
                warn!(layer = self.name.as_str(), shard = i; "weight shard failed verification");
                return Err(EngineErr::Integrity {
                    layer: self.name.clone(),
                    shard: i,
                });
            }

            trace!(layer = self.name.as_str(), shard = i; "weight shard verified");

            let w = ArrayView2::from_shape((plan.rows_per_shard(), self.h_out), &shard[..])?;
            let beta = if i == 0 { 0. } else { 1. };
            let rows = plan.rows(i);

            if x.nrows() == 1 {
                let x = x.slice(s![0, rows]);
                general_mat_vec_mul(1., &w.t(), &x, beta, &mut y.row_mut(0));
            } else {
                let x = x.slice(s![.., rows]);
                general_mat_mul(1., &x, &w, beta, y);
            }
        }

        self.pool.release(shard);
        Ok(())
    }
}

impl<'p> Layer<'p> for Dense<'p> {
    fn name(&self) -> &str {
        &self.name
    }

    fn output_shape(&self) -> Shape4 {
        self.output_shape
    }

    fn output_size(&self) -> usize {
        self.h_out
    }

    fn num_linear(&self) -> usize {
        1
    }

    fn forward(&mut self, input: Input<'_, 'p>, device: Option<DeviceHint>) -> Result<Tensor<'p>> {
        if let Some(DeviceHint(ordinal)) = device {
            trace!(layer = self.name.as_str(), device = ordinal; "ignoring device hint");
        }

        self.last_batch = None;

        let x = input.tensor();
        let batch = x.batch();
        let x = x.matrix(self.h_in)?;

        let shape = [1, 1, batch, self.h_out];
        let mut output = Tensor::new(self.pool.alloc(batch * self.h_out)?, shape)?;
        let start = Instant::now();

        {
            let mut y = output.matrix_mut(self.h_out)?;

            match &self.weights {
                Weights::Resident(w) => {
                    let w = ArrayView2::from_shape((self.h_in, self.h_out), &w[..])?;
                    resident_product(w, x, &mut y);
                }
                Weights::Sharded(sharded) => self.sharded_product(sharded, x, &mut y)?,
            }

            let elapsed = start.elapsed().as_secs_f64();
            debug!(
                layer = self.name.as_str(), h_in = self.h_in, h_out = self.h_out, seconds = elapsed;
                "dense forward"
            );

            y += &ArrayView1::from(&self.bias[..]);
        }

        drop(input);
        self.output_shape = shape;
        self.last_batch = Some(batch);
        Ok(output)
    }

    fn backward(
        &mut self,
        input: &Tensor<'p>,
        grad: Tensor<'p>,
        learning_rate: f32,
    ) -> Result<Tensor<'p>> {
        let Weights::Resident(weights) = &mut self.weights else {
            return Err(EngineErr::Misuse("sharded weights can't be updated"));
        };

        let batch = input.batch();
        match self.last_batch {
            None => return Err(EngineErr::Misuse("backward called without a matching forward")),
            Some(b) if b != batch => {
                return Err(EngineErr::Misuse(
                    "backward input doesn't match the last forward batch",
                ));
            }
            Some(_) => {}
        }

        let x = input.matrix(self.h_in)?;
        let d = grad.matrix(self.h_out)?;
        if d.nrows() != batch {
            return Err(EngineErr::InvalidInput {
                what: "upstream gradient batch",
                got: d.nrows(),
                expected: batch,
            });
        }

        self.last_batch = None;

        let shape = [1, 1, batch, self.h_in];
        let mut result = Tensor::new(self.pool.alloc(batch * self.h_in)?, shape)?;
        let mut w = ArrayViewMut2::from_shape((self.h_in, self.h_out), &mut weights[..])?;

        // The propagated gradient uses the weights of the forward pass, update afterwards.
        general_mat_mul(1., &d, &w.t(), 0., &mut result.matrix_mut(self.h_in)?);

        let scale = -learning_rate / batch as f32;
        general_mat_mul(scale, &x.t(), &d, 1., &mut w);

        let mut b = ArrayViewMut1::from(&mut self.bias[..]);
        b.scaled_add(scale, &d.sum_axis(Axis(0)));

        self.pool.release(grad.into_buffer());
        Ok(result)
    }
}

/// Computes `x · W` with the whole matrix in enclave memory.
fn resident_product(w: ArrayView2<f32>, x: ArrayView2<f32>, y: &mut ArrayViewMut2<f32>) {
    if x.nrows() == 1 {
        general_mat_vec_mul(1., &w.t(), &x.row(0), 0., &mut y.row_mut(0));
    } else {
        general_mat_mul(1., &x, &w, 0., y);
    }
}

/// Derives the reference tag of every shard while the weights are known to be authentic.
fn record_tags(
    pool: &MemPool,
    host: &HostBuffer,
    plan: &ShardPlan,
    mac: &Mac,
) -> Result<Box<[Tag]>> {
    let mut shard = pool.alloc::<f32>(plan.shard_len())?;

    let tags = (0..plan.factor())
        .map(|i| -> Result<Tag> {
            host.copy_range(plan.elements(i), &mut shard)?;
            Ok(mac.tag(shard.as_bytes()))
        })
        .collect::<Result<_>>()?;

    pool.release(shard);
    Ok(tags)
}
