//! Writing a parameter study and reading it back

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use nsol::config::{SolverConfig, StudyConfig};
use nsol::inversion::Problem;
use nsol::measures::SimilarityKind;
use nsol::operators::{ConvolutionOperator, LinearOperator};
use nsol::study::{ParameterGrid, ParameterStudy, ParameterStudyReader, RunStatus};
use nsol::Geometry;

fn blurred_problem() -> Problem {
    let geometry = Geometry::new(&[16, 16]).unwrap();
    let clean: Vec<f64> = (0..256)
        .map(|i| {
            let (x, y) = (i % 16, i / 16);
            if (4..12).contains(&x) && (4..12).contains(&y) { 1.0 } else { 0.0 }
        })
        .collect();

    let blur: Arc<dyn LinearOperator> = Arc::new(ConvolutionOperator::gaussian(&geometry, &[1.0, 1.0]).unwrap());
    let mut rng = StdRng::seed_from_u64(1);
    let noise = Normal::new(0.0, 0.01).unwrap();
    let observed = blur.forward(&clean).unwrap().into_iter().map(|v| v + noise.sample(&mut rng)).collect();

    Problem::new(observed, geometry, blur)
        .unwrap()
        .with_reference(clean)
        .unwrap()
}

fn study_config(directory: &std::path::Path) -> StudyConfig {
    let mut axes = BTreeMap::new();
    axes.insert("alpha".to_string(), vec![0.001, 0.01]);
    axes.insert("rho".to_string(), vec![0.1, 0.5, 1.0]);

    let mut solver = SolverConfig::default().with_parameter("iterations", 8.0).unwrap();
    solver.options_mut().metrics = vec![SimilarityKind::PeakSignalToNoiseRatio];

    StudyConfig {
        name: "deblur_tv".to_string(),
        directory: directory.to_path_buf(),
        solver,
        grid: ParameterGrid::Product(axes),
        parallel: true,
        save_reconstructions: true,
    }
}

#[test]
fn test_study_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let index = ParameterStudy::new(study_config(dir.path()), blurred_problem())
        .unwrap()
        .run()
        .unwrap();
    assert_eq!(index.runs.len(), 6);
    assert!(index.runs.iter().all(|r| r.status != RunStatus::Failed));

    let mut reader = ParameterStudyReader::new(dir.path(), "deblur_tv");
    reader.read_study().unwrap();

    let to_line = reader.get_parameters_to_line().unwrap();
    assert_eq!(to_line.len(), 6);
    let lines: BTreeSet<usize> = to_line.values().copied().collect();
    assert_eq!(lines, (0..6).collect());

    let max_iterations = index.runs.iter().map(|r| r.iterations).max().unwrap();
    let psnr = reader.get_results("PSNR").unwrap();
    assert_eq!(psnr.dim(), (6, max_iterations));

    let mut selection = BTreeMap::new();
    selection.insert("rho".to_string(), vec![0.5, 1.0]);
    let matching = reader.get_lines_to_parameters(&selection).unwrap();
    assert_eq!(matching.len(), 4);
    let total = reader.get_results_for_lines("Total", &matching).unwrap();
    assert_eq!(total.nrows(), 4);
    assert!(total.ncols() <= max_iterations);

    let (geometry, images) = reader.get_reconstructions().unwrap();
    assert_eq!(geometry.shape(), vec![16, 16]);
    assert_eq!(images.len(), 6);
    assert!(images.values().all(|x| x.len() == 256));

    let measures = reader.get_measures().unwrap();
    for name in ["Data", "Reg", "Total", "PSNR", "PrimalResidual", "DualResidual", "Rho"] {
        assert!(measures.iter().any(|m| m == name), "missing measure {} in {:?}", name, measures);
    }
}

#[test]
fn test_study_config_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.json");
    let json = format!(
        r#"{{
            "name": "tikhonov_sweep",
            "directory": {:?},
            "solver": {{"solver": "tikhonov", "params": {{"prior": "zeroth"}}, "options": {{"iterations": 3}}}},
            "grid": {{"points": [{{"alpha": 0.1}}, {{"alpha": 1.0}}]}},
            "parallel": false
        }}"#,
        dir.path().display().to_string()
    );
    std::fs::write(&path, json).unwrap();

    let config = StudyConfig::load(&path).unwrap();
    assert_eq!(config.solver.name(), "tikhonov");
    assert!(config.save_reconstructions);

    let geometry = Geometry::new(&[8]).unwrap();
    let problem = Problem::denoising(vec![1.0; 8], geometry).unwrap();
    let index = ParameterStudy::new(config, problem).unwrap().run().unwrap();
    assert_eq!(index.parameter_names, vec!["alpha".to_string()]);
    assert_eq!(index.runs.len(), 2);
}
