//! Static geometry batching demo.
//!
//! Scatters a field of rocks, batches them into regions, flies a camera over
//! the field while collecting render queues, and optionally uploads the
//! batches to the GPU.

mod field;

use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use glam::Vec3;
use nebula_config::{BatchingConfig, CliArgs, Config};
use nebula_static_geometry::{
    BatchError, BuildContext, Camera, CollectingRenderQueue, GpuBatchAllocator,
    InMemoryMaterialLibrary, Light, Material, RenderSystemCapabilities, SceneTree,
    ShadowRenderableFlags, ShadowVolumeRequest, StaticGeometry, StaticGeometryOptions,
    SystemMemoryBufferManager, Technique,
};
use tracing::{error, info, warn};

const INSTANCE_COUNT: usize = 2_000;
const FIELD_EXTENT: f32 = 4_000.0;
const FIELD_SEED: u64 = 0x5EED;
const ROCK_LOD_DISTANCE: f32 = 600.0;
const FLY_BY_STEPS: usize = 8;

fn main() {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(nebula_config::default_config_dir)
        .unwrap_or_else(|| PathBuf::from("nebula-batch"));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    if let Err(e) = config.validate() {
        eprintln!("{e}, using defaults");
        config = Config::default();
    }

    let log_dir = config_dir.join("logs");
    nebula_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    if let Err(e) = run(&config) {
        error!("Batching demo failed: {e}");
        std::process::exit(1);
    }
}

fn options_from_config(batching: &BatchingConfig) -> StaticGeometryOptions {
    StaticGeometryOptions {
        region_dimensions: Vec3::from_array(batching.region_dimensions),
        origin: Vec3::from_array(batching.origin),
        rendering_distance: batching.rendering_distance,
        visible: batching.visible,
        cast_shadows: batching.cast_shadows,
        render_queue_group: batching.render_queue_group,
        visibility_flags: batching.visibility_flags,
        log_details: batching.log_details,
    }
}

fn material_library() -> InMemoryMaterialLibrary {
    let mut library = InMemoryMaterialLibrary::new();
    library.insert(
        Material::new("stone")
            .with_techniques(vec![
                Technique::new("stone.near", 0).with_vertex_program(),
                Technique::new("stone.far", 1),
            ])
            .with_lod_distances(&[ROCK_LOD_DISTANCE]),
    );
    library.insert(Material::new("sandstone"));
    // "moss" is deliberately absent; its rocks render as holes.
    library
}

fn run(config: &Config) -> Result<(), BatchError> {
    let buffers = SystemMemoryBufferManager::new();
    let materials = material_library();
    let ctx = BuildContext::new(&materials, &buffers).with_capabilities(RenderSystemCapabilities {
        vertex_programs: config.render.vertex_programs,
    });
    let mut scene = SceneTree::new();
    scene.add_light(Light::directional("sun", Vec3::new(-0.3, -1.0, -0.2)));

    let meshes = ["stone", "sandstone", "moss"]
        .into_iter()
        .map(|material| field::rock_mesh(&buffers, material, ROCK_LOD_DISTANCE))
        .collect::<Result<Vec<_>, _>>()?;

    let mut geometry = StaticGeometry::new("rock_field", options_from_config(&config.batching));
    for instance in field::scatter(&meshes, INSTANCE_COUNT, FIELD_EXTENT, FIELD_SEED) {
        geometry.add_mesh_instance(&instance, &buffers)?;
    }
    geometry.build(&mut scene, &ctx, config.render.stencil_shadows)?;

    let stats = geometry.stats();
    info!(
        "Batched {} submeshes into {} regions: {} LOD buckets, {} material buckets, {} geometry buckets ({} vertices, {} indices)",
        stats.queued_sub_meshes,
        stats.regions,
        stats.lod_buckets,
        stats.material_buckets,
        stats.geometry_buckets,
        stats.vertices,
        stats.indices
    );
    info!("Buffer memory in use: {} bytes", buffers.bytes_allocated());
    if config.debug.dump_hierarchy {
        geometry.dump();
    }

    fly_by(&mut geometry, &scene);

    if config.batching.cast_shadows && config.render.stencil_shadows {
        build_shadow_volumes(&mut geometry, &scene, &buffers, config)?;
    }

    upload_to_gpu(&geometry);

    geometry.destroy(&mut scene);
    info!("Batching demo completed successfully");
    Ok(())
}

/// Move the camera across the field and report what each frame submits.
fn fly_by(geometry: &mut StaticGeometry, scene: &SceneTree) {
    let half = FIELD_EXTENT * 0.5;
    for step in 0..FLY_BY_STEPS {
        let t = step as f32 / (FLY_BY_STEPS - 1) as f32;
        let camera = Camera::new(Vec3::new(-half + t * FIELD_EXTENT, 150.0, 0.0));
        geometry.notify_current_camera(&camera);

        let mut queue = CollectingRenderQueue::new();
        geometry.update_render_queue(&mut queue, scene);

        let mut lods: BTreeMap<usize, usize> = BTreeMap::new();
        for region in geometry.regions().values().filter(|r| r.is_visible()) {
            *lods.entry(region.current_lod()).or_default() += 1;
        }
        info!(
            "Camera at {:.0}: {} batches submitted, visible regions per LOD {:?}",
            camera.position,
            queue.len(),
            lods
        );
    }
}

fn build_shadow_volumes(
    geometry: &mut StaticGeometry,
    scene: &SceneTree,
    buffers: &SystemMemoryBufferManager,
    config: &Config,
) -> Result<(), BatchError> {
    let request = ShadowVolumeRequest {
        light: Light::directional("sun", Vec3::new(-0.3, -1.0, -0.2)),
        directional_extrusion_distance: config.batching.shadow_extrusion_distance,
        extrude_vertices: true,
        flags: ShadowRenderableFlags {
            include_light_cap: true,
            include_dark_cap: false,
        },
        index_buffer_capacity: config.render.shadow_index_capacity as usize,
    };
    let mut volumes = 0;
    let mut indices = 0;
    for region in geometry.regions_mut() {
        let renderables = region.shadow_volume_renderables(scene, buffers, &request)?;
        volumes += renderables.len();
        indices += renderables
            .iter()
            .map(|r| r.index_data().index_count)
            .sum::<usize>();
    }
    info!("Generated {volumes} shadow volumes with {indices} indices");
    Ok(())
}

fn upload_to_gpu(geometry: &StaticGeometry) {
    let Some((device, _queue)) = request_device() else {
        warn!("No GPU adapter available, skipping upload");
        return;
    };
    let allocator = GpuBatchAllocator::new(&device);
    let mut uploaded = 0;
    for region in geometry.regions().values() {
        for lod in region.lod_buckets() {
            for (material, bucket) in lod.material_buckets() {
                for (i, batch) in bucket.geometry_buckets().iter().enumerate() {
                    let label = format!("{}/lod{}/{material}/{i}", region.name(), lod.lod());
                    match allocator.upload(&label, batch) {
                        Ok(_) => uploaded += 1,
                        Err(e) => warn!("Upload of {label} failed: {e}"),
                    }
                }
            }
        }
    }
    info!("Uploaded {uploaded} geometry batches to the GPU");
}

fn request_device() -> Option<(wgpu::Device, wgpu::Queue)> {
    pollster::block_on(async {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions::default())
            .await
            .ok()?;
        adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("nebula-batch-demo"),
                ..Default::default()
            })
            .await
            .ok()
    })
}
