//! Statistical building blocks used by the metrics provider.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Exact test for Hardy-Weinberg equilibrium of a biallelic site.
///
/// Implements the algorithm of Wigginton, Cutler and Abecasis (2005). The
/// returned p-value is the summed probability of all heterozygote counts that
/// are at most as likely as the observed one. Sites without any genotype get
/// a p-value of `1.0`.
pub fn hwe_exact_p_value(n_hom_ref: usize, n_het: usize, n_hom_var: usize) -> f64 {
    let n_hom_rare = n_hom_ref.min(n_hom_var);
    let n_hom_common = n_hom_ref.max(n_hom_var);
    let n_genotypes = n_hom_rare + n_het + n_hom_common;
    if n_genotypes == 0 {
        return 1.0;
    }
    let rare_copies = 2 * n_hom_rare + n_het;

    let mut het_probs = vec![0f64; rare_copies + 1];

    // start at the mode of the distribution, parity must match `rare_copies`
    let mut mid = rare_copies * (2 * n_genotypes - rare_copies) / (2 * n_genotypes);
    if (rare_copies % 2) != (mid % 2) {
        mid += 1;
    }
    het_probs[mid] = 1.0;
    let mut sum = 1.0;

    let mut curr_hets = mid;
    let mut curr_homr = (rare_copies - mid) / 2;
    let mut curr_homc = n_genotypes - mid - curr_homr;
    while curr_hets >= 2 {
        let p = het_probs[curr_hets] * (curr_hets * (curr_hets - 1)) as f64
            / (4.0 * (curr_homr + 1) as f64 * (curr_homc + 1) as f64);
        het_probs[curr_hets - 2] = p;
        sum += p;
        curr_hets -= 2;
        curr_homr += 1;
        curr_homc += 1;
    }

    let mut curr_hets = mid;
    let mut curr_homr = (rare_copies - mid) / 2;
    let mut curr_homc = n_genotypes - mid - curr_homr;
    while curr_hets + 2 <= rare_copies {
        let p = het_probs[curr_hets] * 4.0 * curr_homr as f64 * curr_homc as f64
            / ((curr_hets + 2) * (curr_hets + 1)) as f64;
        het_probs[curr_hets + 2] = p;
        sum += p;
        curr_hets += 2;
        curr_homr -= 1;
        curr_homc -= 1;
    }

    let observed = het_probs[n_het] / sum;
    let p_value = het_probs
        .iter()
        .map(|p| p / sum)
        .filter(|p| *p <= observed * (1.0 + 1e-8))
        .sum::<f64>();
    p_value.min(1.0)
}

/// Running sums for the method-of-moments inbreeding coefficient of one sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InbreedingAccumulator {
    /// Number of called sites.
    pub n_called: usize,
    /// Observed homozygous calls.
    pub observed_homs: usize,
    /// Expected homozygous calls under HWE, `sum(1 - 2pq)`.
    pub expected_homs: f64,
}

impl InbreedingAccumulator {
    /// Add one called site with alternate allele frequency `aaf`.
    pub fn push(&mut self, is_hom: bool, aaf: f64) {
        self.n_called += 1;
        if is_hom {
            self.observed_homs += 1;
        }
        self.expected_homs += 1.0 - 2.0 * aaf * (1.0 - aaf);
    }

    /// `F = (O - E) / (N - E)`, `None` if undefined.
    pub fn f_stat(&self) -> Option<f64> {
        let denom = self.n_called as f64 - self.expected_homs;
        if self.n_called == 0 || denom.abs() < f64::EPSILON {
            None
        } else {
            Some((self.observed_homs as f64 - self.expected_homs) / denom)
        }
    }
}

/// Result of a simple linear regression `y ~ 1 + x`.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearFit {
    pub beta: f64,
    pub standard_error: f64,
    pub t_stat: f64,
    pub p_value: f64,
}

/// Fit `y ~ 1 + x` and test `beta = 0` with a two-sided t-test.
///
/// Returns `None` for fewer than three observations or constant `x`.
pub fn linear_regression(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len().min(ys.len());
    if n < 3 {
        return None;
    }
    let mean_x = xs.iter().take(n).sum::<f64>() / n as f64;
    let mean_y = ys.iter().take(n).sum::<f64>() / n as f64;
    let (sxx, sxy) = xs
        .iter()
        .zip(ys)
        .fold((0.0, 0.0), |(sxx, sxy), (x, y)| {
            (
                sxx + (x - mean_x) * (x - mean_x),
                sxy + (x - mean_x) * (y - mean_y),
            )
        });
    if sxx <= f64::EPSILON {
        return None;
    }
    let beta = sxy / sxx;
    let alpha = mean_y - beta * mean_x;
    let rss = xs
        .iter()
        .zip(ys)
        .map(|(x, y)| {
            let residual = y - alpha - beta * x;
            residual * residual
        })
        .sum::<f64>();
    let df = (n - 2) as f64;
    let standard_error = (rss / df / sxx).sqrt();
    if standard_error <= f64::EPSILON {
        return Some(LinearFit {
            beta,
            standard_error,
            t_stat: f64::INFINITY.copysign(beta),
            p_value: 0.0,
        });
    }
    let t_stat = beta / standard_error;
    let dist = StudentsT::new(0.0, 1.0, df).ok()?;
    let p_value = 2.0 * (1.0 - dist.cdf(t_stat.abs()));
    Some(LinearFit {
        beta,
        standard_error,
        t_stat,
        p_value: p_value.clamp(0.0, 1.0),
    })
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, 0, 0, 1.0)]
    #[case(25, 50, 25, 1.0)]
    #[case(1, 0, 1, 1.0 / 3.0)]
    #[case(0, 1, 0, 1.0)]
    fn hwe_exact_known_values(
        #[case] hom_ref: usize,
        #[case] het: usize,
        #[case] hom_var: usize,
        #[case] expected: f64,
    ) {
        let p = hwe_exact_p_value(hom_ref, het, hom_var);
        assert!(
            approx_eq!(f64, p, expected, epsilon = 1e-9),
            "p = {}, expected = {}",
            p,
            expected
        );
    }

    #[test]
    fn hwe_exact_strong_deviation() {
        // no heterozygotes at an intermediate frequency site
        let p = hwe_exact_p_value(50, 0, 50);
        assert!(p < 1e-20, "p = {}", p);
        // symmetric in the homozygote classes
        assert!(approx_eq!(
            f64,
            hwe_exact_p_value(10, 5, 30),
            hwe_exact_p_value(30, 5, 10),
            epsilon = 1e-12
        ));
    }

    #[test]
    fn hwe_exact_is_probability() {
        for het in 0..20 {
            let p = hwe_exact_p_value(40, het, 7);
            assert!(p > 0.0 && p <= 1.0, "het = {}, p = {}", het, p);
        }
    }

    #[test]
    fn inbreeding_extremes() {
        let mut all_hom = InbreedingAccumulator::default();
        let mut all_het = InbreedingAccumulator::default();
        for _ in 0..10 {
            all_hom.push(true, 0.5);
            all_het.push(false, 0.5);
        }

        assert!(approx_eq!(f64, all_hom.f_stat().unwrap(), 1.0, ulps = 4));
        // O = 0, E = 5, N = 10
        assert!(approx_eq!(f64, all_het.f_stat().unwrap(), -1.0, ulps = 4));
        assert_eq!(None, InbreedingAccumulator::default().f_stat());
    }

    #[test]
    fn linear_regression_perfect_and_noisy() {
        let fit = linear_regression(&[0.0, 1.0, 2.0, 3.0], &[1.0, 3.0, 5.0, 7.0]).unwrap();
        assert!(approx_eq!(f64, fit.beta, 2.0, epsilon = 1e-12));
        assert_eq!(0.0, fit.p_value);

        let fit = linear_regression(
            &[0.0, 0.0, 1.0, 1.0, 2.0, 2.0],
            &[0.0, 1.0, 0.0, 1.0, 0.0, 1.0],
        )
        .unwrap();
        assert!(approx_eq!(f64, fit.beta, 0.0, epsilon = 1e-12));
        assert!(approx_eq!(f64, fit.p_value, 1.0, epsilon = 1e-9));

        assert!(linear_regression(&[1.0, 1.0, 1.0], &[0.0, 1.0, 0.0]).is_none());
        assert!(linear_regression(&[1.0, 2.0], &[0.0, 1.0]).is_none());
    }
}
