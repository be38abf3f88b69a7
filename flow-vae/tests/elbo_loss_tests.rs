use approx::assert_abs_diff_eq;
use candle_core::{DType, Device, Tensor, Var};
use flow_vae::candle_elbo_loss::*;
use flow_vae::candle_loss_functions::{bernoulli_likelihood, std_normal_log_density};
use flow_vae::error::{FlowVaeError, Result};

fn gaussian_output(x_hat: Tensor, z: Tensor, mean: Tensor, log_var: Tensor) -> VaeOutput {
    VaeOutput {
        x_hat,
        z,
        params: GaussianParams { mean, log_var },
    }
}

/// B = 2, F = 4, L = 2 with confident, correct logits and `z` at the
/// posterior mean under a unit-variance posterior
fn confident_batch() -> Result<(Tensor, VaeOutput)> {
    let x = Tensor::new(&[[1f64, 0., 1., 1.], [0., 0., 1., 0.]], &Device::Cpu)?;
    let x_hat = ((&x * 40.)? - 20.)?;
    let z = Tensor::zeros((2, 2), DType::F64, &Device::Cpu)?;
    let out = gaussian_output(x_hat, z.clone(), z.clone(), z);
    Ok((x, out))
}

fn random_batch(n: usize) -> Result<(Tensor, VaeOutput)> {
    let dev = Device::Cpu;
    let x = Tensor::rand(0f64, 1f64, (n, 4), &dev)?.ge(0.5)?.to_dtype(DType::F64)?;
    let x_hat = Tensor::randn(0f64, 2f64, (n, 4), &dev)?;
    let z = Tensor::randn(0f64, 1f64, (n, 2), &dev)?;
    let mean = Tensor::randn(0f64, 1f64, (n, 2), &dev)?;
    let log_var = Tensor::randn(0f64, 0.5f64, (n, 2), &dev)?;
    Ok((x, gaussian_output(x_hat, z, mean, log_var)))
}

#[test]
fn confident_reconstruction_has_zero_loss() -> Result<()> {
    let (x, out) = confident_batch()?;
    let res = GaussianLoss.compute_loss(&x, &out, 1.0)?;

    assert_eq!(res.log_p_x.dims(), &[2]);
    assert_abs_diff_eq!(res.loss.to_scalar::<f64>()?, 0., epsilon = 1e-6);
    assert_abs_diff_eq!(res.loss_metrics[LOG_P_Z], 0., epsilon = 1e-6);
    assert_abs_diff_eq!(res.loss_metrics[LOG_Q_ZX], 0., epsilon = 1e-6);
    assert_abs_diff_eq!(res.loss_metrics[ELBO], 0., epsilon = 1e-6);
    Ok(())
}

#[test]
fn no_warm_up_drops_the_entropy_term() -> Result<()> {
    let (x, out) = random_batch(6)?;
    let res = GaussianLoss.compute_loss(&x, &out, 0.0)?;

    let log_p_xz = bernoulli_likelihood(&x, &out.x_hat)?;
    let log_p_z = std_normal_log_density(&out.z)?;
    let expected = (log_p_xz + log_p_z)?.to_vec1::<f64>()?;
    let log_p_x = res.log_p_x.to_vec1::<f64>()?;

    assert_eq!(log_p_x.len(), 6);
    for (u, v) in log_p_x.iter().zip(expected) {
        assert_abs_diff_eq!(*u, v, epsilon = 1e-12);
    }
    Ok(())
}

#[test]
fn metrics_keep_double_precision() -> Result<()> {
    let (x, out) = random_batch(7)?;
    let res = GaussianLoss.compute_loss(&x, &out, 0.3)?;

    let m = &res.loss_metrics;
    let log_p_xz = bernoulli_likelihood(&x, &out.x_hat)?.mean_all()?.to_scalar::<f64>()?;
    assert_abs_diff_eq!(m[LOG_P_XZ], log_p_xz, epsilon = 1e-12);
    assert_abs_diff_eq!(m[ELBO], -res.loss.to_scalar::<f64>()?, epsilon = 1e-12);
    assert_abs_diff_eq!(m[ELBO], m[LOG_P_XZ] + m[LOG_P_Z] - 0.3 * m[LOG_Q_ZX], epsilon = 1e-10);
    Ok(())
}

#[test]
fn full_warm_up_is_the_plain_bound() -> Result<()> {
    let (x, out) = random_batch(6)?;
    let res = GaussianLoss.compute_loss(&x, &out, 1.0)?;

    let m = &res.loss_metrics;
    assert_abs_diff_eq!(m[ELBO], m[LOG_P_XZ] + m[LOG_P_Z] - m[LOG_Q_ZX], epsilon = 1e-4);

    let half = GaussianLoss.compute_loss(&x, &out, 0.5)?;
    let h = &half.loss_metrics;
    assert_abs_diff_eq!(h[ELBO], m[LOG_P_XZ] + m[LOG_P_Z] - 0.5 * m[LOG_Q_ZX], epsilon = 1e-4);
    Ok(())
}

#[test]
fn loss_ignores_sample_order() -> Result<()> {
    let (x, out) = random_batch(5)?;
    let perm = Tensor::new(&[3u32, 0, 4, 1, 2], &Device::Cpu)?;
    let permuted = gaussian_output(
        out.x_hat.index_select(&perm, 0)?,
        out.z.index_select(&perm, 0)?,
        out.params.mean.index_select(&perm, 0)?,
        out.params.log_var.index_select(&perm, 0)?,
    );

    let a = GaussianLoss.compute_loss(&x, &out, 1.0)?;
    let b = GaussianLoss.compute_loss(&x.index_select(&perm, 0)?, &permuted, 1.0)?;

    assert_abs_diff_eq!(a.loss.to_scalar::<f64>()?, b.loss.to_scalar::<f64>()?, epsilon = 1e-10);

    let a_perm = a.log_p_x.index_select(&perm, 0)?.to_vec1::<f64>()?;
    for (u, v) in a_perm.iter().zip(b.log_p_x.to_vec1::<f64>()?) {
        assert_abs_diff_eq!(*u, v, epsilon = 1e-10);
    }
    Ok(())
}

#[test]
fn vanishing_variance_off_the_mean_diverges() -> Result<()> {
    let (x, mut out) = confident_batch()?;
    out.z = Tensor::ones((2, 2), DType::F64, &Device::Cpu)?;
    out.params.log_var = Tensor::full(-1000f64, (2, 2), &Device::Cpu)?;

    let res = GaussianLoss.compute_loss(&x, &out, 1.0)?;
    assert!(!res.loss.to_scalar::<f64>()?.is_finite());
    Ok(())
}

#[test]
fn mismatched_reconstruction_is_a_shape_error() -> Result<()> {
    let (x, mut out) = confident_batch()?;
    out.x_hat = Tensor::zeros((2, 5), DType::F64, &Device::Cpu)?;

    match GaussianLoss.compute_loss(&x, &out, 1.0) {
        Err(FlowVaeError::ShapeMismatch { .. }) => Ok(()),
        Err(e) => panic!("expected a shape mismatch, got {}", e),
        Ok(_) => panic!("expected a shape mismatch"),
    }
}

#[test]
fn flow_loss_without_volume_change_matches_gaussian() -> Result<()> {
    let (x, out) = random_batch(4)?;
    let flow_out = FlowVaeOutput {
        x_hat: out.x_hat.clone(),
        z0: out.z.clone(),
        zk: out.z.clone(),
        log_det: Tensor::zeros(4, DType::F64, &Device::Cpu)?,
        params: out.params.clone(),
    };

    let a = GaussianLoss.compute_loss(&x, &out, 0.7)?;
    let b = FlowGaussianLoss.compute_loss(&x, &flow_out, 0.7)?;

    assert_abs_diff_eq!(a.loss.to_scalar::<f64>()?, b.loss.to_scalar::<f64>()?, epsilon = 1e-12);
    for k in [ELBO, LOG_P_XZ, LOG_P_Z, LOG_Q_ZX] {
        assert_abs_diff_eq!(a.loss_metrics[k], b.loss_metrics[k], epsilon = 1e-6);
    }
    Ok(())
}

#[test]
fn flow_volume_change_lowers_posterior_density() -> Result<()> {
    let (x, out) = random_batch(4)?;
    let log_det = Tensor::new(&[0.5f64, -0.25, 1., 0.], &Device::Cpu)?;
    let flow_out = FlowVaeOutput {
        x_hat: out.x_hat.clone(),
        z0: out.z.clone(),
        zk: out.z.clone(),
        log_det: log_det.clone(),
        params: out.params.clone(),
    };

    let a = GaussianLoss.compute_loss(&x, &out, 1.0)?;
    let b = FlowGaussianLoss.compute_loss(&x, &flow_out, 1.0)?;

    let expected = (&a.log_p_x + &log_det)?.to_vec1::<f64>()?;
    for (u, v) in b.log_p_x.to_vec1::<f64>()?.iter().zip(expected) {
        assert_abs_diff_eq!(*u, v, epsilon = 1e-10);
    }
    assert_abs_diff_eq!(b.loss_metrics[LOG_Q_ZX], a.loss_metrics[LOG_Q_ZX] - 0.3125, epsilon = 1e-5);
    Ok(())
}

#[test]
fn loss_backpropagates_to_reconstruction() -> Result<()> {
    let (x, out) = random_batch(3)?;
    let x_hat = Var::from_tensor(&out.x_hat)?;
    let out = VaeOutput {
        x_hat: x_hat.as_tensor().clone(),
        ..out
    };

    let res = GaussianLoss.compute_loss(&x, &out, 1.0)?;
    assert_eq!(res.loss.dims(), &[] as &[usize]);
    assert_eq!(res.loss_metrics.len(), 4);

    let grads = res.loss.backward()?;
    let grad = grads.get(x_hat.as_tensor()).expect("gradient wrt logits");
    assert_eq!(grad.dims(), &[3, 4]);
    assert!(grad.abs()?.sum_all()?.to_scalar::<f64>()? > 0.);
    Ok(())
}
