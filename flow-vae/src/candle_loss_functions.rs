use candle_core::{Result, Tensor};

/// Binary cross-entropy with logits, elementwise
///
/// bce(l, x) = max(l, 0) - l * x + log(1 + exp(-|l|))
///
/// * `logits` - reconstruction logits
/// * `x` - targets in `[0, 1]`, same shape as `logits`
///
pub fn bce_with_logits(logits: &Tensor, x: &Tensor) -> Result<Tensor> {
    let lx = logits.mul(x)?;
    let tail = (logits.abs()?.neg()?.exp()? + 1.)?.log()?;
    logits.relu()?.sub(&lx)?.add(&tail)
}

/// Bernoulli log-likelihood of binary-ish data given logits
///
/// llik(i) = - sum_f bce(logits(i,f), x(i,f))
///
/// Everything past the first (batch) dimension is summed.
///
/// * `x_nd` - data tensor (observed data)
/// * `logits_nd` - logits tensor (reconstruction)
///
pub fn bernoulli_likelihood(x_nd: &Tensor, logits_nd: &Tensor) -> Result<Tensor> {
    bce_with_logits(logits_nd, x_nd)?
        .flatten_from(1)?
        .sum(1)?
        .neg()
}

/// Standard normal log-density without its normalizing constant
///
/// log p(z) = -0.5 * sum_k z(i,k)^2
///
/// * `z_nk` - latent sample
///
pub fn std_normal_log_density(z_nk: &Tensor) -> Result<Tensor> {
    z_nk.sqr()?.sum(z_nk.rank() - 1)? * (-0.5)
}

/// Diagonal Gaussian log-density without its normalizing constant
///
/// log q(z) = -0.5 * sum_k [ lnvar(i,k) + (z(i,k) - mu(i,k))^2 / exp(lnvar(i,k)) ]
///
/// No floor on the variance: `lnvar -> -inf` with `z != mu` diverges.
///
/// * `z_nk` - sample to evaluate
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn diag_gaussian_log_density(z_nk: &Tensor, z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let d = z_nk.rank() - 1;
    let resid = z_nk.sub(z_mean)?.sqr()?.div(&z_lnvar.exp()?)?.sum(d)?;
    (z_lnvar.sum(d)? + resid)? * (-0.5)
}
