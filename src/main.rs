use std::{env, fs};

use anyhow::Context;
use enclave_dense::{
    Dense, EngineConfig, HostBuffer, Input, Layer, MemPool, ShardingPolicy, Tensor,
};
use log::info;
use rand::{Rng, SeedableRng, rngs::StdRng};

const H_IN: usize = 1024;
const H_OUT: usize = 512;
const BATCH: usize = 8;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => {
            let raw = fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            EngineConfig::from_json(&raw)?
        }
        None => EngineConfig::default(),
    };

    let mut rng = StdRng::seed_from_u64(1234);
    let weights: Vec<f32> = (0..H_IN * H_OUT).map(|_| rng.random_range(-1.0..1.0)).collect();
    let bias: Vec<f32> = (0..H_OUT).map(|_| rng.random_range(-1.0..1.0)).collect();
    let input: Vec<f32> = (0..BATCH * H_IN).map(|_| rng.random_range(-1.0..1.0)).collect();
    let host = HostBuffer::from_vec(weights);

    let mut outputs = Vec::new();
    for sharding in [ShardingPolicy::Never, ShardingPolicy::Always] {
        let config = config.clone().with_sharding(sharding);
        let pool = MemPool::from_config(&config);
        let mut dense =
            Dense::new("demo", [1, 1, BATCH, H_IN], (H_IN, H_OUT), &host, &bias, &pool, &config)?;

        let x = Tensor::from_slice(&pool, [1, 1, BATCH, H_IN], &input)?;
        let y = dense.forward(Input::from(x), None)?;
        outputs.push(y.data().to_vec());

        let stats = pool.stats();
        info!(
            sharded = dense.is_sharded(), peak = stats.peak, in_use = stats.in_use;
            "forward done"
        );
    }

    let deviation = outputs[0]
        .iter()
        .zip(&outputs[1])
        .map(|(a, b)| (a - b).abs())
        .fold(0f32, f32::max);

    println!("max deviation between resident and sharded outputs: {deviation:e}");
    Ok(())
}
