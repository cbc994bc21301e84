use std::fs;
use std::path::PathBuf;

use super::{pendulum_ocp, setup_error};
use crate::{
    GnsfMatrices, GnsfStructure, IntegratorConfig, IntegratorType, JsonStructureProvider, OcpError, OcpSolver,
    Pendulum, StructureProvider,
};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("multishoot-{name}-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
pub fn structure_json_file() {
    let structure = Pendulum::default().gnsf_structure();
    let dir = scratch_dir("gnsf-json");
    let path = dir.join(GnsfStructure::file_name(Pendulum::NAME));
    fs::write(&path, structure.to_json().unwrap()).unwrap();

    let loaded = JsonStructureProvider::new(&dir).structure(Pendulum::NAME).unwrap();

    assert_eq!(path.file_name().unwrap(), "pendulum_ode_gnsf_functions.json");
    assert_eq!(loaded, structure);
    fs::remove_dir_all(dir).unwrap();
}

#[test]
pub fn solver_with_gnsf_stages() {
    let dir = scratch_dir("gnsf-solver");
    let structure = Pendulum::default().gnsf_structure();
    fs::write(
        dir.join(GnsfStructure::file_name(Pendulum::NAME)),
        structure.to_json().unwrap(),
    )
    .unwrap();

    let mut ocp = pendulum_ocp();
    ocp.solver_options.integrator = IntegratorConfig::new(IntegratorType::Gnsf);
    // mixed schemes along the horizon
    ocp.solver_options
        .integrator_overrides
        .insert(0, IntegratorConfig::new(IntegratorType::Erk));
    ocp.structure_provider = Some(Box::new(JsonStructureProvider::new(&dir)));

    let solver = OcpSolver::new(ocp).unwrap();
    let json: serde_json::Value = serde_json::from_str(&solver.config_json().unwrap()).unwrap();

    assert_eq!(json["stages"][0]["integrator"], "Erk");
    assert_eq!(json["stages"][1]["integrator"], "Gnsf");
    assert_eq!(json["stages"][14]["integrator"], "Gnsf");
    assert!(json["stages"][15]["integrator"].is_null());
    fs::remove_dir_all(dir).unwrap();
}

#[test]
pub fn missing_structure_file() {
    let dir = scratch_dir("gnsf-missing");
    let mut ocp = pendulum_ocp();
    ocp.solver_options.integrator = IntegratorConfig::new(IntegratorType::Gnsf);
    ocp.structure_provider = Some(Box::new(JsonStructureProvider::new(&dir)));

    let err = setup_error(ocp);

    match &err {
        OcpError::MissingStructuralModel { model, reason } => {
            assert_eq!(model, Pendulum::NAME);
            assert!(reason.contains("pendulum_ode_gnsf_functions.json"), "{reason}");
        }
        _ => panic!("unexpected error: {err}"),
    }
    fs::remove_dir_all(dir).unwrap();
}

#[test]
pub fn missing_provider() {
    let mut ocp = pendulum_ocp();
    ocp.solver_options
        .integrator_overrides
        .insert(3, IntegratorConfig::new(IntegratorType::Gnsf));

    let err = setup_error(ocp);
    assert!(matches!(err, OcpError::MissingStructuralModel { .. }), "{err}");
}

#[test]
pub fn structure_of_another_model() {
    let mut structure = Pendulum::default().gnsf_structure();
    structure.model_name = "crane".to_string();
    let mut ocp = pendulum_ocp();
    ocp.solver_options.integrator = IntegratorConfig::new(IntegratorType::Gnsf);
    ocp.structure_provider = Some(Box::new(structure));

    let err = setup_error(ocp);
    assert!(matches!(err, OcpError::MissingStructuralModel { .. }), "{err}");
}

#[test]
pub fn stale_structure() {
    let model = Pendulum::default();
    let mut structure = model.gnsf_structure();
    // drop the p' = v row
    structure.a[0][2] = 0.0;

    let err = GnsfMatrices::new(&structure, &model).unwrap_err();
    assert!(matches!(&err, OcpError::Configuration(msg) if msg.contains("stale")), "{err}");

    let mut ocp = pendulum_ocp();
    ocp.solver_options.integrator = IntegratorConfig::new(IntegratorType::Gnsf);
    ocp.structure_provider = Some(Box::new(structure));
    let err = setup_error(ocp);
    assert!(matches!(err, OcpError::Configuration(_)), "{err}");
}

#[test]
pub fn malformed_dimensions() {
    let model = Pendulum::default();
    let mut structure = model.gnsf_structure();
    structure.l_x[1].pop();

    let err = GnsfMatrices::new(&structure, &model).unwrap_err();
    assert!(matches!(err, OcpError::DimensionMismatch { .. }), "{err}");
}
