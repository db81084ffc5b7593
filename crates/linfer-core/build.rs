fn main() {
    // Generate the snapshot section messages
    protobuf_codegen::Codegen::new()
        .pure()
        .includes(["src/protos"])
        .input("src/protos/snapshot.proto")
        .cargo_out_dir("snapshot-protos")
        .run_from_script();
}
