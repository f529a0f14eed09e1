//! Parses and validates the WGSL kernels with naga, as the device would
//! when creating the pipelines.

use raylight2d::backend::ComputePipelineDescriptor;
use raylight2d::pipeline::shaders::{
    self, FINALIZE_ENTRY, FINALIZE_TILE, INITIALIZE_ENTRY, MARCH_ENTRY, PREPARE_MARCH_ENTRY,
};
use rstest::rstest;

fn descriptor(shader: String, entry_point: &str, group_size: u32) -> ComputePipelineDescriptor {
    ComputePipelineDescriptor {
        label: None,
        shader,
        entry_point: entry_point.to_string(),
        workgroup_size: [group_size, 1, 1],
        bind_group_layouts: Vec::new(),
        constants: vec![("GROUP_SIZE".to_string(), group_size)],
    }
}

fn validate(source: &str) -> naga::Module {
    let module = naga::front::wgsl::parse_str(source)
        .unwrap_or_else(|err| panic!("WGSL parse failed:\n{}", err.emit_to_string(source)));
    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .unwrap_or_else(|err| panic!("WGSL validation failed: {:?}", err));
    module
}

fn workgroup_size(module: &naga::Module, entry_point: &str) -> [u32; 3] {
    module
        .entry_points
        .iter()
        .find(|entry| entry.name == entry_point)
        .map(|entry| entry.workgroup_size)
        .unwrap_or_else(|| panic!("missing entry point {}", entry_point))
}

#[rstest]
#[case::default_group(64)]
#[case::small_group(8)]
#[case::single_thread(1)]
fn test_lighting_shader_validates(#[case] group_size: u32) {
    let desc = descriptor(shaders::lighting_shader(group_size), INITIALIZE_ENTRY, group_size);
    let module = validate(&desc.full_source());

    assert_eq!(workgroup_size(&module, INITIALIZE_ENTRY), [group_size, 1, 1]);
    assert_eq!(workgroup_size(&module, MARCH_ENTRY), [group_size, 1, 1]);
    assert_eq!(
        workgroup_size(&module, FINALIZE_ENTRY),
        [FINALIZE_TILE, FINALIZE_TILE, 1]
    );
}

#[rstest]
#[case::default_group(64)]
#[case::small_group(8)]
fn test_prepare_shader_validates(#[case] group_size: u32) {
    let desc = descriptor(shaders::prepare_shader(), PREPARE_MARCH_ENTRY, group_size);
    let module = validate(&desc.full_source());
    assert_eq!(workgroup_size(&module, PREPARE_MARCH_ENTRY), [1, 1, 1]);
}

#[test]
fn test_prepare_shader_needs_group_size() {
    // GROUP_SIZE comes from the pipeline constants, not the module itself
    assert!(naga::front::wgsl::parse_str(&shaders::prepare_shader()).is_err());
}
