use std::num::NonZeroUsize;

use enclave_dense::{
    Dense, EngineConfig, EngineErr, ErrorKind, HostBuffer, Input, Layer, MemPool, ShardingPolicy,
    Tensor,
};

fn sharded_config(factor: usize) -> EngineConfig {
    EngineConfig::default()
        .with_sharding(ShardingPolicy::Always)
        .with_shard_factor(NonZeroUsize::new(factor).unwrap())
}

fn weights(len: usize) -> Vec<f32> {
    (0..len).map(|i| i as f32 * 0.25).collect()
}

#[test]
fn tampering_any_shard_is_rejected() {
    let dim = (8, 3);
    let factor = 4;

    for target in 0..dim.0 * dim.1 {
        let pool = MemPool::new(1 << 12);
        let host = HostBuffer::from_vec(weights(dim.0 * dim.1));
        let config = sharded_config(factor);
        let mut dense =
            Dense::new("fc", [1, 1, 1, dim.0], dim, &host, &[0.; 3], &pool, &config).unwrap();

        host.write(|w| w[target] += 1.);

        let x = Tensor::from_slice(&pool, [1, 1, 1, dim.0], &[1.; 8]).unwrap();
        let err = dense.forward(Input::from(x), None).unwrap_err();

        let expected_shard = target / (dim.0 / factor * dim.1);
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(
            matches!(err, EngineErr::Integrity { shard, .. } if shard == expected_shard),
            "tampering element {target} reported {err}"
        );
    }
}

#[test]
fn single_byte_flip_is_rejected() {
    let pool = MemPool::new(1 << 12);
    let host = HostBuffer::from_vec(weights(12));
    let mut dense =
        Dense::new("fc", [1, 1, 1, 4], (4, 3), &host, &[0.; 3], &pool, &sharded_config(2))
            .unwrap();

    host.write(|w| {
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(w);
        bytes[13] ^= 0x80;
    });

    let x = Tensor::from_slice(&pool, [1, 1, 1, 4], &[1.; 4]).unwrap();
    let err = dense.forward(x.into(), None).unwrap_err();
    assert!(matches!(err, EngineErr::Integrity { shard: 0, .. }));
}

#[test]
fn failed_verification_releases_every_buffer() {
    let pool = MemPool::new(1 << 12);
    let host = HostBuffer::from_vec(weights(12));
    let mut dense =
        Dense::new("fc", [1, 1, 2, 4], (4, 3), &host, &[0.; 3], &pool, &sharded_config(2))
            .unwrap();
    let resident = pool.stats();

    host.write(|w| w[11] = -1.);

    let x = Tensor::from_slice(&pool, [1, 1, 2, 4], &[1.; 8]).unwrap();
    assert!(dense.forward(x.into(), None).is_err());

    let after = pool.stats();
    assert_eq!(after.in_use, resident.in_use);
    assert_eq!(after.live, resident.live);
}

#[test]
fn restoring_weights_restores_service() {
    let pool = MemPool::new(1 << 12);
    let original = weights(12);
    let host = HostBuffer::from_vec(original.clone());
    let mut dense =
        Dense::new("fc", [1, 1, 1, 4], (4, 3), &host, &[0.; 3], &pool, &sharded_config(2))
            .unwrap();

    host.write(|w| w[0] = 42.);
    let x = Tensor::from_slice(&pool, [1, 1, 1, 4], &[1.; 4]).unwrap();
    assert!(dense.forward(Input::from(&x), None).is_err());

    host.write(|w| w.copy_from_slice(&original));
    let y = dense.forward(Input::from(&x), None).unwrap();
    assert_eq!(y.data(), &[4.5, 5.5, 6.5]);
}

#[test]
fn sharded_forward_fits_where_resident_does_not() {
    let dim = (64, 16);
    let host = HostBuffer::from_vec(weights(dim.0 * dim.1));

    // Room for a shard, the bias and the activations, not for the whole matrix.
    let capacity = 4 * (dim.0 * dim.1) / 2;

    let pool = MemPool::new(capacity);
    let resident = EngineConfig::default().with_sharding(ShardingPolicy::Never);
    let err = Dense::new("fc", [1, 1, 1, dim.0], dim, &host, &[0.; 16], &pool, &resident)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Allocation);

    let mut dense =
        Dense::new("fc", [1, 1, 1, dim.0], dim, &host, &[0.; 16], &pool, &sharded_config(8))
            .unwrap();
    let x = Tensor::from_slice(&pool, [1, 1, 1, dim.0], &[1.; 64]).unwrap();
    let y = dense.forward(x.into(), None).unwrap();
    assert_eq!(y.data().len(), 16);
    assert!(pool.stats().peak <= capacity);
}
