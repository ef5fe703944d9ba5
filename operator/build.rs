use ambient_code_types::*;
use kube::CustomResourceExt;
use std::fs;

fn main() {
    let _ = fs::create_dir("../crds");
    fs::write(
        "../crds/ambient-code.io_agenticsessions_crd.yaml",
        serde_yaml::to_string(&AgenticSession::crd()).unwrap(),
    )
    .unwrap();
}
