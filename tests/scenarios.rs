//! End-to-end solver scenarios on small 1D signals

use approx::assert_relative_eq;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use nsol::inversion::{AdmmParams, AdmmSolver, PrimalDualParams, PrimalDualSolver, Problem, TikhonovParams, TikhonovSolver};
use nsol::measures::{anisotropic_total_variation, root_mean_square_error, PriorKind, TvNorm};
use nsol::operators::{Boundary, DifferenceOperator};
use nsol::solvers::{IterationOptions, SolverState, StopReason};
use nsol::Geometry;

const N: usize = 50;

/// Step edge at the midpoint
fn clean_step() -> Vec<f64> {
    (0..N).map(|i| if i < N / 2 { 0.0 } else { 1.0 }).collect()
}

fn noisy_step(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.05).unwrap();
    clean_step().into_iter().map(|v| v + noise.sample(&mut rng)).collect()
}

fn denoising(observed: Vec<f64>) -> Problem {
    Problem::denoising(observed, Geometry::new(&[N]).unwrap()).unwrap()
}

fn options(iterations: usize, tolerance: f64) -> IterationOptions {
    IterationOptions {
        iterations,
        tolerance,
        ..Default::default()
    }
}

#[test]
fn test_tv_alpha_sweep_has_interior_optimum() {
    let clean = clean_step();
    let observed = noisy_step(42);
    let alphas = [0.001, 0.01, 0.1, 1.0];

    let errors: Vec<f64> = alphas
        .iter()
        .map(|&alpha| {
            let params = AdmmParams { alpha, ..Default::default() };
            let mut solver = AdmmSolver::admm(denoising(observed.clone()), &params, options(500, 1e-8)).unwrap();
            let outcome = solver.run().unwrap();
            root_mean_square_error(&outcome.x, &clean).unwrap()
        })
        .collect();

    let best = errors
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert!(
        best > 0 && best < alphas.len() - 1,
        "error should be minimal at an interior alpha, errors = {:?}",
        errors
    );
}

#[test]
fn test_tikhonov_small_alpha_reproduces_data() {
    let observed = noisy_step(7);
    let params = TikhonovParams {
        alpha: 1e-10,
        prior: PriorKind::ZerothOrderTikhonov,
        ..Default::default()
    };
    let mut solver = TikhonovSolver::tikhonov(denoising(observed.clone()), &params, options(5, 1e-6)).unwrap();
    let outcome = solver.run().unwrap();

    for (x, b) in outcome.x.iter().zip(&observed) {
        assert_relative_eq!(x, b, epsilon = 1e-6);
    }
}

#[test]
fn test_primal_dual_and_admm_reach_same_objective() {
    let observed = noisy_step(3);
    let alpha = 0.1;

    let admm_params = AdmmParams { alpha, ..Default::default() };
    let mut admm = AdmmSolver::admm(denoising(observed.clone()), &admm_params, options(500, 0.0)).unwrap();
    admm.run().unwrap();
    let admm_total = *admm.record().get("Total").unwrap().last().unwrap();

    let pd_params = PrimalDualParams { alpha, ..Default::default() };
    let mut pd = PrimalDualSolver::primal_dual(denoising(observed), &pd_params, options(3000, 0.0)).unwrap();
    pd.run().unwrap();
    let pd_total = *pd.record().get("Total").unwrap().last().unwrap();

    assert_relative_eq!(admm_total, pd_total, max_relative = 1e-2);
}

#[test]
fn test_anisotropic_tv_records_its_own_objective() {
    // 8x8 image with a diagonal edge, where the two TV norms differ
    let g = Geometry::new(&[8, 8]).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let noise = Normal::new(0.0, 0.05).unwrap();
    let observed: Vec<f64> = (0..64)
        .map(|idx| if idx % 8 + idx / 8 >= 8 { 1.0 } else { 0.0 } + noise.sample(&mut rng))
        .collect();
    let problem = Problem::denoising(observed, g.clone()).unwrap();
    let alpha = 0.05;

    let admm_params = AdmmParams { alpha, tv_norm: TvNorm::Anisotropic, ..Default::default() };
    let mut admm = AdmmSolver::admm(problem.clone(), &admm_params, options(1000, 0.0)).unwrap();
    let x_admm = admm.run().unwrap().x;

    let d = DifferenceOperator::new(&g, Boundary::Neumann);
    let reg = *admm.record().get("Reg").unwrap().last().unwrap();
    assert_relative_eq!(reg, anisotropic_total_variation(&x_admm, &d).unwrap(), max_relative = 1e-12);

    let pd_params = PrimalDualParams { alpha, tv_norm: TvNorm::Anisotropic, ..Default::default() };
    let mut pd = PrimalDualSolver::primal_dual(problem, &pd_params, options(3000, 0.0)).unwrap();
    pd.run().unwrap();

    let admm_total = *admm.record().get("Total").unwrap().last().unwrap();
    let pd_total = *pd.record().get("Total").unwrap().last().unwrap();
    assert_relative_eq!(admm_total, pd_total, max_relative = 1e-2);
}

#[test]
fn test_total_cost_is_approximately_monotone() {
    let observed = noisy_step(11);
    let warm_up = 50;

    let admm_params = AdmmParams { alpha: 0.1, ..Default::default() };
    let mut admm = AdmmSolver::admm(denoising(observed.clone()), &admm_params, options(200, 0.0)).unwrap();
    admm.run().unwrap();

    let pd_params = PrimalDualParams { alpha: 0.1, ..Default::default() };
    let mut pd = PrimalDualSolver::primal_dual(denoising(observed), &pd_params, options(200, 0.0)).unwrap();
    pd.run().unwrap();

    for (name, totals) in [("ADMM", admm.record().get("Total").unwrap()), ("PD", pd.record().get("Total").unwrap())] {
        assert_eq!(totals.len(), 200);
        let mut best = totals[warm_up];
        for (k, &total) in totals.iter().enumerate().skip(warm_up) {
            assert!(
                total <= best * (1.0 + 2e-2),
                "{} total rose at iteration {}: {} > {}",
                name, k, total, best
            );
            best = best.min(total);
        }
        assert!(totals[totals.len() - 1] < totals[0], "{} did not decrease the total cost", name);
    }
}

#[test]
fn test_zero_tolerance_single_iteration() {
    let observed = noisy_step(5);
    let opts = options(1, 0.0);

    let mut tikhonov =
        TikhonovSolver::tikhonov(denoising(observed.clone()), &TikhonovParams::default(), opts.clone()).unwrap();
    let mut admm = AdmmSolver::admm(denoising(observed.clone()), &AdmmParams::default(), opts.clone()).unwrap();
    let mut pd = PrimalDualSolver::primal_dual(denoising(observed), &PrimalDualParams::default(), opts).unwrap();

    for outcome in [tikhonov.run().unwrap(), admm.run().unwrap(), pd.run().unwrap()] {
        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.stop_reason, StopReason::MaxIterations);
        assert_eq!(outcome.state, SolverState::MaxIterReached);
    }
    assert_eq!(admm.record().get("Total").unwrap().len(), 1);

    // A finished solver cannot be rerun
    assert!(admm.run().is_err());
}
