use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(
            &pagerduty_operator::resources::pagerdutyintegrations::PagerDutyIntegration::crd()
        )
        .unwrap()
    )
}
