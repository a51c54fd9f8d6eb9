use containership_upgrade::model::ClusterUpgrade;
use kube::CustomResourceExt;

fn main() {
    print!("{}", serde_yaml::to_string(&ClusterUpgrade::crd()).unwrap());
}
