use vergen::EmitBuilder;

fn main() {
    // 生成版本与构建信息
    EmitBuilder::builder()
        .all_build()
        .all_git()
        .emit()
        .expect("Failed to generate build information");
}
