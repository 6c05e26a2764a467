//! # Trajectory optimisation executable
//!
//! Runs a single scenario through the sequential convex optimiser.
//!
//! Usage: `traj_opt_exec [scenario_path]`
//!
//! Optimiser and log parameters are read from
//! `$TRAJ_OPT_ROOT/params/traj_opt.toml`. The
//! scenario is read from the given path, or `$TRAJ_OPT_ROOT/params/scenario.toml`
//! if no path is given. The iteration history is archived to
//! `arch/iterations.csv` and the final report saved to `result.json` in the
//! session directory.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use std::env;
use std::sync::Arc;

use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use log::{debug, info, warn};
use serde::Deserialize;

use traj_opt_lib::{
    dynamics::DynamicsModel,
    qp::ClarabelBackend,
    scenario::{control_guess, ScenarioParams},
    scvx::{self, OptConfig, OptError},
};
use util::{
    archive::Archiver,
    host,
    logger::{logger_init, LogParams},
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Contents of `traj_opt.toml`
#[derive(Deserialize)]
struct ExecParams {
    #[serde(default)]
    log: LogParams,

    #[serde(flatten)]
    optimiser: scvx::Params,
}

// ---------------------------------------------------------------------------
// MAIN
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    color_eyre::install()?;

    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session =
        Session::new("traj_opt_exec", "sessions").wrap_err("Failed to create the session")?;

    let exec_params: ExecParams =
        util::params::load("traj_opt.toml").wrap_err("Could not load optimiser params")?;
    let params = exec_params.optimiser;

    // Initialise logger
    let (min_level, solver_level) = exec_params
        .log
        .levels()
        .wrap_err("Invalid log levels")?;
    logger_init(min_level, solver_level, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Trajectory Optimisation\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD SCENARIO ----

    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    let scenario: ScenarioParams = match args.len() {
        1 => util::params::load("scenario.toml").wrap_err("Could not load scenario params")?,
        2 => {
            info!("Loading scenario from \"{}\"", &args[1]);
            util::params::load_from_path(&args[1]).wrap_err("Could not load scenario params")?
        }
        _ => return Err(eyre!("Expected at most one argument, the path to a scenario")),
    };

    info!(
        "Scenario: {:?} model, {} states at dt = {} s",
        scenario.model, scenario.horizon, scenario.dt
    );

    // ---- BUILD PROBLEM ----

    let model: Arc<dyn DynamicsModel + Send + Sync> =
        Arc::from(scenario.build_model().wrap_err("Invalid scenario model")?);

    let reference = scenario.reference();
    let guess = control_guess(scenario.model, &reference, scenario.dt);

    let mut config = OptConfig::new(model, reference.clone(), scenario.dt, params.clone());
    config.initial_controls = Some(guess);

    let mut backend = ClarabelBackend::new(params.solver.clone());

    // ---- OPTIMISE ----

    info!("Begining optimisation\n");

    let result = scvx::optimise(config, &mut backend);

    let report = match result {
        Ok(r) => r,
        Err(OptError::SolverFailure { iteration, source }) => {
            session.exit();
            return Err(eyre!(
                "QP solve failed on iteration {}: {}",
                iteration,
                source
            ));
        }
        Err(e) => {
            session.exit();
            return Err(e).wrap_err("Optimisation failed");
        }
    };

    info!(
        "Optimisation finished with {:?} after {} iterations, cost {:?}",
        report.status, report.iterations, report.cost
    );
    if let Some(x) = report.trajectory.final_state() {
        info!("Final state: {:?}", x.as_slice());
    }
    if !report.status.is_converged() {
        warn!("The returned trajectory is the best found, not a converged one");
    }

    // ---- SAVE RESULTS ----

    let mut archiver =
        Archiver::from_path(&session, "iterations.csv").wrap_err("Failed to create the archive")?;
    for record in &report.history {
        archiver
            .serialise(record)
            .wrap_err("Failed to archive iteration record")?;
    }

    session.save("reference.json", reference);
    session.save("result.json", report);

    session.exit();

    Ok(())
}
