// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use approx::assert_abs_diff_eq;
use vec1::vec1;

use super::*;
use crate::{
    engine::sim::{SimEngine, SimulationConfig},
    image::{ImageGeometry, ModelImage},
    math::c64,
    region::Shape,
    store::StoreError,
    tests::{circle, component_at, sky_model, two_source_config, two_source_mask, CELL},
};

struct Field {
    workspace: Workspace,
    model: ArtifactId,
    bright: Region,
    faint: Region,
}

/// The two-source field without gain errors, with the true sky as its model.
fn field() -> Field {
    let config = SimulationConfig {
        phase_error: 0.0,
        ..two_source_config()
    };
    let dataset = config.simulate().unwrap().dataset;
    let frame = dataset.frame;
    let mut workspace = Workspace::new("field", dataset);
    let model = workspace.id(Stage::SelfCalModel, 0);
    workspace
        .models
        .insert(model.clone(), sky_model(&config, 64))
        .unwrap();
    Field {
        workspace,
        model,
        bright: circle("bright", frame, 8, 6, 4.0),
        faint: circle("faint", frame, -9, -4, 4.0),
    }
}

fn params(cleanup: bool) -> PeelParams {
    PeelParams {
        reference_antenna: 0,
        min_baselines_per_antenna: 3,
        weighting: Weighting::Natural,
        threshold: 1e-3,
        cleanup,
    }
}

fn full_field_imaging() -> ImagingParams {
    let mut imaging = ImagingParams::new(64, CELL);
    imaging.weighting = Weighting::Natural;
    imaging.niter = 2000;
    imaging.threshold = 5e-3;
    imaging
}

#[test]
fn test_peel_image_size() {
    assert_eq!(peel_image_size(1), Some(128));
    assert_eq!(peel_image_size(128), Some(128));
    assert_eq!(peel_image_size(129), Some(256));
    assert_eq!(peel_image_size(512), Some(512));
    assert_eq!(peel_image_size(513), Some(1024));
    assert_eq!(peel_image_size(2048), Some(2048));
    assert_eq!(peel_image_size(2049), None);
}

#[test]
fn test_peel_keeps_intermediates_without_cleanup() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let input_id = workspace.current().clone();
    let input = workspace.current_dataset().unwrap().clone();
    let engine = SimEngine::default();
    let params = params(false);

    let outcome = PeelPipeline::new(&engine, &params)
        .run(&mut workspace, &model, &bright, 0)
        .unwrap();
    assert_eq!(outcome.dataset, workspace.id(Stage::Peeled, 0));
    assert_eq!(workspace.current(), &outcome.dataset);
    assert_eq!(outcome.image_size, 128);
    assert_abs_diff_eq!(outcome.phase_centre.l, 8.0 * CELL, epsilon = 1e-12);
    assert_abs_diff_eq!(outcome.phase_centre.m, 6.0 * CELL, epsilon = 1e-12);

    // The input is untouched.
    assert_eq!(workspace.datasets.get(&input_id).unwrap(), &input);

    assert_eq!(workspace.datasets.len(), 4);
    for stage in [Stage::PeelSubtracted, Stage::PeelIsolated] {
        assert!(workspace.datasets.contains(&workspace.id(stage, 0)));
    }
    assert_eq!(workspace.models.len(), 4);
    assert_eq!(workspace.tables.len(), 4);

    // The inverted tables really are inverses.
    let phase = workspace
        .tables
        .get(&workspace.id(Stage::PeelPhase, 0))
        .unwrap();
    let phase_inv = workspace
        .tables
        .get(&workspace.id(Stage::PeelPhaseInverted, 0))
        .unwrap();
    for (g, g_inv) in phase.gains.iter().zip(phase_inv.gains.iter()) {
        if g.norm() > 0.0 {
            assert_abs_diff_eq!(*g * *g_inv, c64::new(1.0, 0.0), epsilon = 1e-12);
        }
    }

    // The complement and isolated models partition the input model.
    let mut sum = workspace
        .models
        .get(&workspace.id(Stage::PeelComplementModel, 0))
        .unwrap()
        .clone();
    sum.add_assign(
        workspace
            .models
            .get(&workspace.id(Stage::PeelIsolatedModel, 0))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(&sum, workspace.models.get(&model).unwrap());
}

#[test]
fn test_peel_cleanup() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let engine = SimEngine::default();
    let params = params(true);
    let outcome = PeelPipeline::new(&engine, &params)
        .run(&mut workspace, &model, &bright, 0)
        .unwrap();

    let datasets: Vec<_> = workspace.datasets.ids().map(|id| id.stage).collect();
    assert_eq!(datasets, vec![Stage::Input, Stage::Peeled]);
    let models: Vec<_> = workspace.models.ids().cloned().collect();
    assert_eq!(models, vec![model, outcome.refined_model]);
    assert!(workspace.tables.is_empty());
}

#[test]
fn test_peel_restart_is_idempotent() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let input_id = workspace.current().clone();
    let engine = SimEngine::default();
    let params = params(false);
    let pipeline = PeelPipeline::new(&engine, &params);

    let first = pipeline.run(&mut workspace, &model, &bright, 0).unwrap();
    let first_dataset = workspace.datasets.get(&first.dataset).unwrap().clone();
    let first_model = workspace.models.get(&first.refined_model).unwrap().clone();

    // Run again from the same input; the stale artefacts are replaced.
    workspace.set_current(input_id).unwrap();
    let second = pipeline.run(&mut workspace, &model, &bright, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(workspace.datasets.get(&second.dataset).unwrap(), &first_dataset);
    assert_eq!(
        workspace.models.get(&second.refined_model).unwrap(),
        &first_model
    );
    assert_eq!(workspace.datasets.len(), 4);
    assert_eq!(workspace.tables.len(), 4);
}

#[test]
fn test_peel_of_peeled_data_starts_again() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let input_id = workspace.current().clone();
    let engine = SimEngine::default();
    let params = params(false);
    let pipeline = PeelPipeline::new(&engine, &params);

    let first = pipeline.run(&mut workspace, &model, &bright, 0).unwrap();
    let first_dataset = workspace.datasets.get(&first.dataset).unwrap().clone();
    assert_eq!(workspace.parent(&first.dataset), Some(&input_id));

    // The current dataset is the peeled one; peeling it again mustn't peel
    // the source twice.
    let second = pipeline.run(&mut workspace, &model, &bright, 0).unwrap();
    assert_eq!(first, second);
    assert_eq!(workspace.current(), &second.dataset);
    assert_eq!(workspace.datasets.get(&second.dataset).unwrap(), &first_dataset);
    assert_eq!(workspace.parent(&second.dataset), Some(&input_id));
    assert_eq!(workspace.datasets.len(), 4);
    assert_eq!(workspace.tables.len(), 4);
}

#[test]
fn test_peel_of_peeled_data_with_unknown_origin() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let orphan = workspace.id(Stage::Peeled, 3);
    let dataset = workspace.current_dataset().unwrap().clone();
    workspace.datasets.insert(orphan.clone(), dataset).unwrap();
    workspace.set_current(orphan.clone()).unwrap();

    let engine = SimEngine::default();
    let params = params(false);
    let result = PeelPipeline::new(&engine, &params).run(&mut workspace, &model, &bright, 0);
    assert!(matches!(result, Err(PeelError::UnknownOrigin { .. })));
    assert_eq!(workspace.current(), &orphan);
    assert_eq!(workspace.datasets.len(), 2);
}

#[test]
fn test_peel_removes_a_source_with_its_own_gains() {
    // The bright source is seen through drifting phase errors that nothing
    // else in the field has.
    let bright_only = SimulationConfig {
        components: vec![component_at(8, 6, 20.0)],
        phase_error: 0.8,
        phase_drift: 0.3,
        noise: 0.0,
        seed: 7,
        ..two_source_config()
    };
    let faint_only = SimulationConfig {
        components: vec![component_at(-9, -4, 5.0)],
        phase_error: 0.0,
        ..two_source_config()
    };
    let reference = faint_only.simulate().unwrap().dataset;
    let mut dataset = reference.clone();
    dataset.observed += &bright_only.simulate().unwrap().dataset.observed;
    dataset.corrected = dataset.observed.clone();

    let frame = dataset.frame;
    let bright = circle("bright", frame, 8, 6, 4.0);
    let faint = circle("faint", frame, -9, -4, 4.0);
    let mut workspace = Workspace::new("field", dataset);
    let model = workspace.id(Stage::SelfCalModel, 0);
    let true_sky = SimulationConfig {
        phase_error: 0.0,
        ..two_source_config()
    };
    workspace
        .models
        .insert(model.clone(), sky_model(&true_sky, 64))
        .unwrap();

    let engine = SimEngine::default();
    let params = params(true);
    PeelPipeline::new(&engine, &params)
        .run(&mut workspace, &model, &bright, 0)
        .unwrap();

    let imaging = full_field_imaging();
    let after = engine
        .image(workspace.current_dataset().unwrap(), &faint, &imaging)
        .unwrap();
    let sigma = after.noise;
    assert!(sigma.is_finite() && sigma > 0.0);
    let (x, y) = after
        .model
        .geometry
        .lm_to_pixel(Lm::new(8.0 * CELL, 6.0 * CELL))
        .unwrap();
    let leftover = after.model.terms[(0, y, x)] + after.residual[(y, x)];
    assert!(
        leftover.abs() < 3.0 * sigma,
        "leftover {leftover} vs sigma {sigma}"
    );

    // The faint source looks as it would without the bright one.
    let expected = engine
        .image(&reference, &faint, &imaging)
        .unwrap()
        .model
        .flux_in(&faint)
        .unwrap();
    let faint_after = after.model.flux_in(&faint).unwrap();
    assert!(
        (faint_after - expected).abs() < 0.01 * expected,
        "{expected} vs {faint_after}"
    );
}

#[test]
fn test_peel_removes_only_the_peeled_source() {
    let Field {
        mut workspace,
        model,
        bright,
        faint,
    } = field();
    let engine = SimEngine::default();
    let imaging = full_field_imaging();
    let frame = workspace.current_dataset().unwrap().frame;

    let before = engine
        .image(
            workspace.current_dataset().unwrap(),
            &two_source_mask(frame),
            &imaging,
        )
        .unwrap();
    assert_abs_diff_eq!(before.model.flux_in(&bright).unwrap(), 20.0, epsilon = 0.1);

    let params = params(true);
    PeelPipeline::new(&engine, &params)
        .run(&mut workspace, &model, &bright, 0)
        .unwrap();

    let after = engine
        .image(workspace.current_dataset().unwrap(), &faint, &imaging)
        .unwrap();
    let sigma = after.noise;
    assert!(sigma.is_finite() && sigma > 0.0);

    // The bright source is gone.
    let (x, y) = after
        .model
        .geometry
        .lm_to_pixel(Lm::new(8.0 * CELL, 6.0 * CELL))
        .unwrap();
    let leftover = after.model.terms[(0, y, x)] + after.residual[(y, x)];
    assert!(
        leftover.abs() < 3.0 * sigma,
        "leftover {leftover} vs sigma {sigma}"
    );

    // The faint source is as it was.
    let faint_before = before.model.flux_in(&faint).unwrap();
    let faint_after = after.model.flux_in(&faint).unwrap();
    assert!(
        (faint_after - faint_before).abs() < 0.01 * faint_before,
        "{faint_before} vs {faint_after}"
    );
}

#[test]
fn test_peel_errors_leave_the_workspace_alone() {
    let Field {
        mut workspace,
        model,
        ..
    } = field();
    let input_id = workspace.current().clone();
    let frame = workspace.current_dataset().unwrap().frame;
    let engine = SimEngine::default();
    let params = params(false);
    let pipeline = PeelPipeline::new(&engine, &params);

    let elsewhere = circle("elsewhere", SkyFrame { ra: 0.0, dec: 0.0 }, 8, 6, 4.0);
    assert!(matches!(
        pipeline.run(&mut workspace, &model, &elsewhere, 0),
        Err(PeelError::FrameMismatch { .. })
    ));

    let off_image = circle("off", frame, 500, 500, 4.0);
    assert!(matches!(
        pipeline.run(&mut workspace, &model, &off_image, 0),
        Err(PeelError::EmptyRegion { .. })
    ));

    let empty_sky = circle("empty", frame, 0, 0, 2.0);
    assert!(matches!(
        pipeline.run(&mut workspace, &model, &empty_sky, 0),
        Err(PeelError::NothingToPeel { .. })
    ));

    let missing = workspace.id(Stage::PeelImage, 7);
    assert!(matches!(
        pipeline.run(&mut workspace, &missing, &empty_sky, 0),
        Err(PeelError::Store(StoreError::Missing { .. }))
    ));

    // A strip 2050 pixels long can't be peeled.
    let strip = ImageGeometry {
        size_x: 2050,
        size_y: 1,
        cell: CELL,
        centre: Lm::default(),
        frame,
    };
    let strip_id = workspace.id(Stage::SelfCalModel, 1);
    workspace
        .models
        .insert(strip_id.clone(), ModelImage::zeros(strip, 1))
        .unwrap();
    let everything = Region::new(
        "everything",
        vec1![Shape::Box {
            blc: Lm::new(-1100.0 * CELL, -CELL),
            trc: Lm::new(1100.0 * CELL, CELL),
        }],
        frame,
    );
    assert!(matches!(
        pipeline.run(&mut workspace, &strip_id, &everything, 0),
        Err(PeelError::RegionTooLarge { extent: 2050, .. })
    ));

    assert_eq!(workspace.current(), &input_id);
    assert_eq!(workspace.datasets.len(), 1);
    assert!(workspace.tables.is_empty());
}

#[test]
fn test_peel_sequence() {
    let Field {
        mut workspace,
        model,
        bright,
        faint,
    } = field();
    let frame = workspace.current_dataset().unwrap().frame;
    let mask = two_source_mask(frame);
    let engine = SimEngine::default();
    let params = params(true);
    let imaging = full_field_imaging();

    let steps = PeelSequence::new(&engine, &params, &mask, &imaging)
        .run(&mut workspace, &model, &[bright.clone(), faint.clone()])
        .unwrap();
    assert_eq!(steps.len(), 2);
    assert_eq!(steps[0].peel.dataset, workspace.id(Stage::Peeled, 0));
    assert_eq!(steps[1].peel.dataset, workspace.id(Stage::Peeled, 1));
    assert_eq!(workspace.current(), &steps[1].peel.dataset);

    // The first image still has the faint source, the second has nothing.
    let first = workspace.models.get(&steps[0].image).unwrap();
    assert!(first.flux_in(&bright).unwrap().abs() < 0.1);
    assert_abs_diff_eq!(first.flux_in(&faint).unwrap(), 5.0, epsilon = 0.1);
    let second = workspace.models.get(&steps[1].image).unwrap();
    assert!(second.flux_in(&faint).unwrap().abs() < 0.1);
    assert!(steps[1].noise.is_finite());
    assert_eq!(first.terms.dim(), (2, 64, 64));
}

#[test]
fn test_peel_sequence_failure_keeps_earlier_peels() {
    let Field {
        mut workspace,
        model,
        bright,
        ..
    } = field();
    let frame = workspace.current_dataset().unwrap().frame;
    let mask = two_source_mask(frame);
    let engine = SimEngine::default();
    let params = params(true);
    let imaging = full_field_imaging();
    let empty_sky = circle("empty", frame, 0, 0, 2.0);

    let err = PeelSequence::new(&engine, &params, &mask, &imaging)
        .run(&mut workspace, &model, &[bright, empty_sky])
        .unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.region, "empty");
    assert!(matches!(err.err, PeelError::NothingToPeel { .. }));
    assert_eq!(err.completed.len(), 1);
    assert_eq!(err.completed[0].peel.dataset, workspace.id(Stage::Peeled, 0));
    assert_eq!(workspace.current(), &err.completed[0].peel.dataset);
    assert!(workspace.models.contains(&err.completed[0].image));
}
